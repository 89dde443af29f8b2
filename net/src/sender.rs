//! Outbound message state machine.
//!
//! A sender frames exactly one message at a time: the length prefix, then
//! the payload. It only ever performs non-blocking writes; one call to
//! [`Sender::run`] pushes as much as the kernel accepts and returns.

use std::io::{self, Write};
use std::net::TcpStream;

use crate::error::Error;
use crate::frame::{self, HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    Message,
}

/// Coarse sender status visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No message pending; a new subscription is accepted.
    Idle,
    /// A message is partially written.
    Busy,
}

/// Frames one outgoing message over a non-blocking stream.
#[derive(Debug)]
pub struct Sender {
    state: State,
    header: [u8; HEADER_LEN],
    buf: Vec<u8>,
    sent: usize,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Sender {
    /// A fresh, idle sender.
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header: [0; HEADER_LEN],
            buf: Vec::new(),
            sent: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        if self.state == State::Idle {
            Status::Idle
        } else {
            Status::Busy
        }
    }

    /// Abandon any pending message and return to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buf.clear();
        self.sent = 0;
    }

    /// Accept a message for sending.
    ///
    /// Fails with [`Error::SenderBusy`] unless idle; the caller decides
    /// whether to retry after draining.
    pub fn subscribe(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::SenderBusy);
        }
        if payload.len() > frame::MAX_MESSAGE_SIZE {
            return Err(Error::InvalidLength(payload.len() as u32));
        }

        self.buf.clear();
        self.buf.extend_from_slice(payload);
        self.header = frame::header(payload.len());
        self.sent = 0;
        self.state = State::Header;

        Ok(())
    }

    /// Write as much of the pending message as the kernel will take.
    ///
    /// Would-block is absorbed; socket errors are returned and the caller
    /// is expected to tear the connection down.
    pub fn run(&mut self, conn: &mut TcpStream) -> io::Result<()> {
        loop {
            let seg_len = match self.state {
                State::Idle => return Ok(()),
                State::Header => HEADER_LEN,
                State::Message => self.buf.len(),
            };

            while self.sent < seg_len {
                let segment = match self.state {
                    State::Header => &self.header[..],
                    _ => &self.buf[..],
                };
                let n = match conn.write(&segment[self.sent..]) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::Interrupted =>
                    {
                        return Ok(())
                    }
                    Err(e) => return Err(e),
                };
                self.sent += n;
            }

            // Segment complete. An empty payload skips straight through.
            self.sent = 0;
            self.state = match self.state {
                State::Header => State::Message,
                _ => State::Idle,
            };
        }
    }
}
