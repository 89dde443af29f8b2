//! Transport errors.

use std::io;

use thiserror::Error;
use trellis_common::config;
use trellis_common::peer;

/// An error raised by the transport.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The sender still holds an earlier, unsent message.
    #[error("sender is busy with an earlier message")]
    SenderBusy,
    /// A frame announced a length we refuse to honor.
    #[error("invalid message length {0:#010x}")]
    InvalidLength(u32),
    /// The hello handshake carried an undecodable address.
    #[error("hello handshake: {0}")]
    Hello(#[from] peer::DecodeError),
    /// The configuration tag list failed to parse.
    #[error("configuration: {0}")]
    Config(#[from] config::ParseError),
}
