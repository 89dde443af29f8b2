//! Inbound message state machine.
//!
//! The receiver owns its reassembly buffer: the header announces the
//! payload size, the buffer is sized to match, and the completed message
//! stays readable until the caller takes it with [`Recver::read`].

use std::io::{self, Read};
use std::net::TcpStream;

use crate::error::Error;
use crate::frame::{self, HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Message,
    Complete,
}

/// Receiver status visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing received since the last message was taken.
    Empty,
    /// A message is partially reassembled.
    Busy,
    /// A full message is buffered and waiting to be read.
    MsgReady,
}

/// Outcome of driving the receiver over a readable stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Made what progress the socket allowed; call again on readiness.
    Pending,
    /// The peer closed the stream in an orderly way.
    Disconnected,
}

/// Reassembles one inbound message at a time.
#[derive(Debug)]
pub struct Recver {
    state: State,
    header: [u8; HEADER_LEN],
    buf: Vec<u8>,
    recvd: usize,
}

impl Default for Recver {
    fn default() -> Self {
        Self::new()
    }
}

impl Recver {
    /// A fresh receiver, waiting on a header.
    pub fn new() -> Self {
        Self {
            state: State::Header,
            header: [0; HEADER_LEN],
            buf: Vec::new(),
            recvd: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        match self.state {
            State::Header if self.recvd == 0 => Status::Empty,
            State::Header | State::Message => Status::Busy,
            State::Complete => Status::MsgReady,
        }
    }

    /// Discard any partial reassembly and wait for a new header.
    pub fn reset(&mut self) {
        self.state = State::Header;
        self.recvd = 0;
    }

    /// Take the completed message, if any, and return to header state.
    pub fn read(&mut self) -> Option<Vec<u8>> {
        if self.state != State::Complete {
            return None;
        }
        self.reset();
        Some(std::mem::take(&mut self.buf))
    }

    /// Read as much as the socket offers without blocking.
    ///
    /// Returns [`Progress::Disconnected`] on orderly close; framing
    /// violations and socket errors surface as `Err` and the caller is
    /// expected to tear the connection down.
    pub fn run(&mut self, conn: &mut TcpStream) -> Result<Progress, Error> {
        loop {
            match self.state {
                State::Header => {
                    match conn.read(&mut self.header[self.recvd..]) {
                        Ok(0) => return Ok(Progress::Disconnected),
                        Ok(n) => self.recvd += n,
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::Interrupted =>
                        {
                            return Ok(Progress::Pending)
                        }
                        Err(e) => return Err(e.into()),
                    }
                    if self.recvd == HEADER_LEN {
                        let announced = frame::decode(self.header)?;

                        self.buf.clear();
                        self.buf.resize(announced, 0);
                        self.recvd = 0;
                        self.state = State::Message;
                    }
                }
                State::Message => {
                    if self.recvd < self.buf.len() {
                        match conn.read(&mut self.buf[self.recvd..]) {
                            Ok(0) => return Ok(Progress::Disconnected),
                            Ok(n) => self.recvd += n,
                            Err(e)
                                if e.kind() == io::ErrorKind::WouldBlock
                                    || e.kind() == io::ErrorKind::Interrupted =>
                            {
                                return Ok(Progress::Pending)
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    if self.recvd == self.buf.len() {
                        self.recvd = 0;
                        self.state = State::Complete;
                        return Ok(Progress::Pending);
                    }
                }
                State::Complete => return Ok(Progress::Pending),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::Sender;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let out = TcpStream::connect(addr).unwrap();
        let (inc, _) = listener.accept().unwrap();

        out.set_nonblocking(true).unwrap();
        inc.set_nonblocking(true).unwrap();
        (out, inc)
    }

    fn drive(recver: &mut Recver, conn: &mut TcpStream) {
        for _ in 0..100 {
            if recver.status() == Status::MsgReady {
                return;
            }
            recver.run(conn).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("no message after 100 rounds");
    }

    #[test]
    fn sender_to_recver_delivery() {
        let (mut out, mut inc) = pair();
        let mut sender = Sender::new();
        let mut recver = Recver::new();

        sender.subscribe(b"ranked view").unwrap();
        sender.run(&mut out).unwrap();

        drive(&mut recver, &mut inc);
        assert_eq!(recver.read().unwrap(), b"ranked view");
        assert_eq!(recver.status(), Status::Empty);
        assert_eq!(recver.read(), None);
    }

    #[test]
    fn zero_byte_message_is_delivered() {
        let (mut out, mut inc) = pair();
        let mut sender = Sender::new();
        let mut recver = Recver::new();

        sender.subscribe(b"").unwrap();
        sender.run(&mut out).unwrap();
        assert_eq!(sender.status(), crate::sender::Status::Idle);

        drive(&mut recver, &mut inc);
        assert_eq!(recver.read().unwrap(), b"");
    }

    #[test]
    fn poisoned_length_aborts_the_stream() {
        let (mut out, mut inc) = pair();
        let mut recver = Recver::new();

        out.set_nonblocking(false).unwrap();
        out.write_all(&[0xff; 4]).unwrap();

        let err = loop {
            match recver.run(&mut inc) {
                Ok(Progress::Pending) => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                Ok(Progress::Disconnected) => panic!("expected an error"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, Error::InvalidLength(u32::MAX)));
    }

    #[test]
    fn orderly_close_reports_disconnect() {
        let (out, mut inc) = pair();
        let mut recver = Recver::new();

        drop(out);
        let progress = loop {
            match recver.run(&mut inc).unwrap() {
                Progress::Pending => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                progress => break progress,
            }
        };
        assert_eq!(progress, Progress::Disconnected);
    }
}
