//! Length-prefixed message framing.
//!
//! Every message travels as a 4-byte network-order length followed by the
//! payload. The all-ones length is reserved; anything larger than
//! [`MAX_MESSAGE_SIZE`] poisons the stream.

use crate::error::Error;

/// Size of the frame header.
pub const HEADER_LEN: usize = 4;

/// Largest payload a peer may announce.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Reserved length value; a peer announcing it is misbehaving.
const LENGTH_SENTINEL: u32 = u32::MAX;

/// Encode a payload length into a frame header.
pub fn header(len: usize) -> [u8; HEADER_LEN] {
    (len as u32).to_be_bytes()
}

/// Decode and validate a frame header.
pub fn decode(header: [u8; HEADER_LEN]) -> Result<usize, Error> {
    let len = u32::from_be_bytes(header);

    if len == LENGTH_SENTINEL || len as usize > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidLength(len));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(decode(header(0)).unwrap(), 0);
        assert_eq!(decode(header(42)).unwrap(), 42);
        assert_eq!(decode(header(MAX_MESSAGE_SIZE)).unwrap(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn rejects_sentinel_and_oversize() {
        assert!(matches!(
            decode([0xff; 4]),
            Err(Error::InvalidLength(u32::MAX))
        ));
        assert!(matches!(
            decode(header(MAX_MESSAGE_SIZE + 1)),
            Err(Error::InvalidLength(_))
        ));
    }
}
