//! Peer identity and its wire representation.
//!
//! A peer is identified solely by its advertised socket address. The wire
//! form is fixed-width per address family: a family tag, the raw address
//! octets and the port in network byte order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Identifies a peer on the overlay.
pub type PeerId = SocketAddr;

/// Family tag for IPv4 addresses.
const FAMILY_V4: u8 = 4;
/// Family tag for IPv6 addresses.
const FAMILY_V6: u8 = 6;

/// Dumped length of an IPv4 peer id.
pub const DUMP_LEN_V4: usize = 1 + 4 + 2;
/// Dumped length of an IPv6 peer id.
pub const DUMP_LEN_V6: usize = 1 + 16 + 2;

/// Error decoding a peer id from its wire form.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the full address was read.
    #[error("truncated peer id ({0} bytes available)")]
    Truncated(usize),
    /// The family tag is not one we understand.
    #[error("unsupported address family tag {0}")]
    Family(u8),
}

/// Wire length implied by a family tag.
pub fn dump_len(family: u8) -> Result<usize, DecodeError> {
    match family {
        FAMILY_V4 => Ok(DUMP_LEN_V4),
        FAMILY_V6 => Ok(DUMP_LEN_V6),
        other => Err(DecodeError::Family(other)),
    }
}

/// Wire length of the given peer id.
pub fn dumped_len(id: &PeerId) -> usize {
    if id.is_ipv4() {
        DUMP_LEN_V4
    } else {
        DUMP_LEN_V6
    }
}

/// Serialize a peer id into its fixed-width wire form.
pub fn dump(id: &PeerId) -> Vec<u8> {
    let mut out = Vec::with_capacity(dumped_len(id));

    match id.ip() {
        IpAddr::V4(ip) => {
            out.push(FAMILY_V4);
            out.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            out.push(FAMILY_V6);
            out.extend_from_slice(&ip.octets());
        }
    }
    out.extend_from_slice(&id.port().to_be_bytes());
    out
}

/// Decode a peer id from the head of `buf`.
///
/// Returns the decoded id and the number of bytes consumed, so callers can
/// parse sequences of dumped ids.
pub fn undump(buf: &[u8]) -> Result<(PeerId, usize), DecodeError> {
    let family = *buf.first().ok_or(DecodeError::Truncated(0))?;
    let len = dump_len(family)?;

    if buf.len() < len {
        return Err(DecodeError::Truncated(buf.len()));
    }
    let port = u16::from_be_bytes([buf[len - 2], buf[len - 1]]);
    let ip = match family {
        FAMILY_V4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[1..5]);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        _ => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[1..17]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    Ok((SocketAddr::new(ip, port), len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_v4() {
        let id: PeerId = ([127, 0, 0, 1], 6312).into();
        let bytes = dump(&id);

        assert_eq!(bytes.len(), DUMP_LEN_V4);
        assert_eq!(undump(&bytes).unwrap(), (id, DUMP_LEN_V4));
    }

    #[test]
    fn roundtrip_v6() {
        let id: PeerId = "[2001:db8::1]:9000".parse().unwrap();
        let bytes = dump(&id);

        assert_eq!(bytes.len(), DUMP_LEN_V6);
        assert_eq!(undump(&bytes).unwrap(), (id, DUMP_LEN_V6));
    }

    #[test]
    fn undump_consumes_prefix_only() {
        let a: PeerId = ([10, 0, 0, 1], 1).into();
        let b: PeerId = ([10, 0, 0, 2], 2).into();

        let mut bytes = dump(&a);
        bytes.extend(dump(&b));

        let (first, used) = undump(&bytes).unwrap();
        let (second, _) = undump(&bytes[used..]).unwrap();

        assert_eq!(first, a);
        assert_eq!(second, b);
    }

    #[test]
    fn rejects_truncation_and_unknown_family() {
        let id: PeerId = ([127, 0, 0, 1], 80).into();
        let bytes = dump(&id);

        assert_eq!(
            undump(&bytes[..3]),
            Err(DecodeError::Truncated(3))
        );
        assert_eq!(undump(&[]), Err(DecodeError::Truncated(0)));
        assert_eq!(undump(&[9, 0, 0]), Err(DecodeError::Family(9)));
    }

    #[test]
    fn order_agrees_with_equality() {
        let a: PeerId = ([127, 0, 0, 1], 5000).into();
        let b: PeerId = ([127, 0, 0, 1], 5001).into();

        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
        assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);
        assert_eq!(a == b, a.cmp(&b) == std::cmp::Ordering::Equal);
    }
}
