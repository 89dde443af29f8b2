//! Readiness scanner and completed-message FIFO.
//!
//! One scan multiplexes the listening socket, any caller-supplied
//! descriptors and every connected neighbor through a single poll. The
//! interest sets are rebuilt on every call, so connects and teardowns
//! between scans need no registration bookkeeping. Neighbors whose
//! receiver completed a message are appended to a FIFO drained by
//! [`Inbox::next`].

use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::{debug, error, warn};
use trellis_common::peer::PeerId;

use crate::dictionary::Dictionary;
use crate::error::Error;
use crate::hello;
use crate::recver;

/// Upper bound on a single unbounded wait; callers loop over scans, so the
/// bound is invisible to them.
const LONG_WAIT: Duration = Duration::from_secs(60);

/// A caller-supplied descriptor watched for readability.
#[derive(Debug)]
pub struct UserFd {
    /// The descriptor to watch.
    pub fd: RawFd,
    /// Set once a scan saw the descriptor readable.
    pub ready: bool,
}

impl From<RawFd> for UserFd {
    fn from(fd: RawFd) -> Self {
        Self { fd, ready: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Listener,
    Peer(PeerId),
    User(RawFd),
}

/// FIFO of peers holding a completed inbound message.
#[derive(Debug, Default)]
pub struct Inbox {
    ready: VecDeque<PeerId>,
}

impl Inbox {
    /// An empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no completed message is queued.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Pop the next peer with a completed message.
    ///
    /// Entries whose message has meanwhile been consumed are skipped, so a
    /// returned peer always has a message ready.
    pub fn next(&mut self, neighbors: &mut Dictionary) -> Option<PeerId> {
        while let Some(addr) = self.ready.pop_front() {
            if let Some(client) = neighbors.get_mut(&addr) {
                client.queued = false;
                if client.has_message() {
                    return Some(addr);
                }
            }
        }
        None
    }

    /// One multiplexing pass over the listener, `user_fds` and every
    /// connected neighbor.
    ///
    /// Waits at most `max_wait` (`None` waits unbounded). Accepted streams
    /// complete the hello handshake and are adopted under their advertised
    /// address. Readable user descriptors are flagged in place and make the
    /// scan return `true`.
    pub fn scan(
        &mut self,
        neighbors: &mut Dictionary,
        listener: &TcpListener,
        user_fds: &mut [UserFd],
        max_wait: Option<Duration>,
    ) -> Result<bool, Error> {
        let mut sources = popol::Sources::new();

        sources.register(Source::Listener, listener, popol::events::READ);
        for user in user_fds.iter() {
            sources.register(Source::User(user.fd), &user.fd, popol::events::READ);
        }
        for (addr, client) in neighbors.iter() {
            if let Some(conn) = client.conn() {
                sources.register(Source::Peer(*addr), conn, popol::events::ALL);
            }
        }

        let wait = match popol::wait(&mut sources, max_wait.unwrap_or(LONG_WAIT)) {
            Ok(wait) => wait,
            Err(err) => return Err(err.into()),
        };

        if wait.is_empty() {
            return Ok(false);
        }

        let mut user_woke = false;
        let mut accept_ready = false;
        let mut peers = Vec::new();

        for (source, ev) in wait.iter() {
            match source {
                Source::Listener => accept_ready |= ev.readable,
                Source::User(fd) => {
                    if ev.readable {
                        if let Some(user) = user_fds.iter_mut().find(|u| u.fd == fd) {
                            user.ready = true;
                        }
                        user_woke = true;
                    }
                }
                Source::Peer(addr) => peers.push((addr, ev.readable, ev.writable)),
            }
        }

        if accept_ready {
            accept_pending(neighbors, listener);
        }

        for (addr, readable, writable) in peers {
            let Some(client) = neighbors.get_mut(&addr) else {
                continue;
            };

            if readable {
                match client.run_recv() {
                    Ok(recver::Progress::Disconnected) => {
                        debug!(target: "net", "{}: peer closed the stream", addr);
                    }
                    Ok(recver::Progress::Pending) => {}
                    Err(err) => {
                        warn!(target: "net", "{}: recv failed: {}", addr, err);
                        client.teardown();
                    }
                }
            }
            if writable {
                if let Err(err) = client.run_send() {
                    warn!(target: "net", "{}: send failed: {}", addr, err);
                    client.teardown();
                }
            }

            if client.has_message() && !client.queued {
                client.queued = true;
                self.ready.push_back(addr);
            }
        }

        Ok(user_woke)
    }

}

/// Drain the listener, adopting each accepted stream under the address
/// its hello advertises. Accept errors end the drain; a bad hello only
/// drops that one stream.
fn accept_pending(neighbors: &mut Dictionary, listener: &TcpListener) {
    loop {
        let (mut conn, from) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                error!(target: "net", "accept: {}", err);
                return;
            }
        };

        let advertised = match handshake(&mut conn) {
            Ok(advertised) => advertised,
            Err(err) => {
                warn!(target: "net", "{}: dropping stream, bad hello: {}", from, err);
                continue;
            }
        };

        debug!(target: "net", "{}: adopted, advertising {}", from, advertised);
        neighbors.get_or_create(advertised).adopt(conn);
    }
}

/// Complete the hello exchange on an accepted stream and switch it to
/// non-blocking. The read is bounded so a silent connector cannot stall
/// the scan forever.
fn handshake(conn: &mut TcpStream) -> Result<PeerId, Error> {
    conn.set_read_timeout(Some(hello::HELLO_TIMEOUT))?;
    let advertised = hello::recv(conn)?;
    conn.set_nonblocking(true)?;

    Ok(advertised)
}
