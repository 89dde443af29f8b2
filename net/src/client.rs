//! Per-neighbor connection state.
//!
//! A client pairs one TCP stream with a sender and a receiver machine. It
//! is created empty by the dictionary, connected on first outbound use or
//! adopted on an accepted stream, torn down on EOF or error, and remains
//! reusable afterward: the next send through the same slot reconnects.

use std::net::TcpStream;
use std::time::Duration;

use trellis_common::peer::PeerId;
use trellis_common::time::Deadline;

use crate::error::Error;
use crate::hello;
use crate::recver::{self, Recver};
use crate::sender::{self, Sender};

/// How long a neighbor may stay silent before callers may evict it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A neighbor's stream plus its framing state machines.
#[derive(Debug)]
pub struct Client {
    conn: Option<TcpStream>,
    sender: Sender,
    recver: Recver,
    idle: Deadline,
    /// Whether this client currently sits in the inbox FIFO.
    pub(crate) queued: bool,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// An empty, disconnected client.
    pub fn new() -> Self {
        Self {
            conn: None,
            sender: Sender::new(),
            recver: Recver::new(),
            idle: Deadline::new(Some(DEFAULT_IDLE_TIMEOUT)),
            queued: false,
        }
    }

    /// Open a stream to `to` and announce `local` as our bind address.
    ///
    /// A failed connect leaves the client exactly as it was: empty and
    /// ready for a retry.
    pub fn connect(&mut self, to: PeerId, local: PeerId) -> Result<(), Error> {
        let mut conn = TcpStream::connect(to)?;

        conn.set_write_timeout(Some(hello::HELLO_TIMEOUT))?;
        hello::send(&mut conn, &local)?;
        conn.set_nonblocking(true)?;

        self.adopt(conn);
        Ok(())
    }

    /// Take over a fresh stream, resetting both machines.
    ///
    /// A completed-but-unread inbound message survives the swap; it
    /// belongs to the address, not the stream, and stays readable until
    /// taken.
    pub fn adopt(&mut self, conn: TcpStream) {
        self.sender.reset();
        if !self.has_message() {
            self.recver.reset();
        }
        self.idle.reset();
        self.conn = Some(conn);
    }

    /// Close the stream. A completed message stays readable.
    pub fn teardown(&mut self) {
        self.conn = None;
    }

    /// A client is valid while it holds an open stream or an unread
    /// completed message.
    pub fn valid(&self) -> bool {
        self.has_message() || self.conn.is_some()
    }

    /// Whether a completed inbound message is waiting.
    pub fn has_message(&self) -> bool {
        self.recver.status() == recver::Status::MsgReady
    }

    /// Whether the sender still holds an unsent message.
    pub fn requires_sending(&self) -> bool {
        self.sender.status() == sender::Status::Busy
    }

    /// Whether the idle deadline has passed.
    pub fn idle_expired(&self) -> bool {
        self.idle.expired()
    }

    /// The stream, while one is open.
    pub fn conn(&self) -> Option<&TcpStream> {
        self.conn.as_ref()
    }

    /// Subscribe a message to the sender.
    pub fn write(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.sender.subscribe(payload)
    }

    /// Take the completed inbound message, if any.
    pub fn read(&mut self) -> Option<Vec<u8>> {
        self.recver.read()
    }

    /// Drive the sender over the stream.
    pub fn run_send(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.as_mut() {
            self.sender.run(conn)?;
        }
        Ok(())
    }

    /// Drive the receiver over the stream.
    ///
    /// On orderly close the stream is dropped but the client stays valid
    /// while it holds a completed message.
    pub fn run_recv(&mut self) -> Result<recver::Progress, Error> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(recver::Progress::Pending);
        };

        match self.recver.run(conn) {
            Ok(recver::Progress::Disconnected) => {
                self.conn = None;
                Ok(recver::Progress::Disconnected)
            }
            Ok(progress) => {
                if self.has_message() {
                    self.idle.reset();
                }
                Ok(progress)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clients_are_invalid_and_quiet() {
        let client = Client::new();

        assert!(!client.valid());
        assert!(!client.has_message());
        assert!(!client.requires_sending());
        assert!(client.conn().is_none());
    }

    #[test]
    fn failed_connect_leaves_no_state() {
        // Grab a port that nothing listens on.
        let dead = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };

        let mut client = Client::new();
        let local: PeerId = ([127, 0, 0, 1], 9).into();

        assert!(client.connect(dead, local).is_err());
        assert!(!client.valid());
        assert!(client.conn().is_none());
    }

    #[test]
    fn run_without_stream_is_a_no_op() {
        let mut client = Client::new();

        client.run_send().unwrap();
        assert_eq!(client.run_recv().unwrap(), recver::Progress::Pending);
    }
}
