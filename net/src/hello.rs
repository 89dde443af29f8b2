//! Bind-address handshake.
//!
//! Streams are keyed by the *advertised* bind address of the connecting
//! side, not by the ephemeral port `accept` reports. Immediately after
//! connecting, a peer therefore writes the dump of its own bind address;
//! the acceptor reads it back and uses it as the dictionary key.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use trellis_common::peer::{self, PeerId};

use crate::error::Error;

/// Bound on how long a handshake read or write may stall.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Announce our bind address on a freshly connected stream.
pub fn send(conn: &mut TcpStream, local: &PeerId) -> Result<(), Error> {
    conn.write_all(&peer::dump(local))?;
    Ok(())
}

/// Read the connector's advertised bind address off an accepted stream.
pub fn recv(conn: &mut TcpStream) -> Result<PeerId, Error> {
    let mut family = [0u8; 1];
    conn.read_exact(&mut family)?;

    let len = peer::dump_len(family[0])?;
    let mut buf = vec![0u8; len];
    buf[0] = family[0];
    conn.read_exact(&mut buf[1..])?;

    let (id, _) = peer::undump(&buf)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn advertised_address_survives_the_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let advertised: PeerId = ([127, 0, 0, 1], 6312).into();
        let mut out = TcpStream::connect(addr).unwrap();
        let (mut inc, from) = listener.accept().unwrap();

        send(&mut out, &advertised).unwrap();
        assert_eq!(recv(&mut inc).unwrap(), advertised);
        assert_ne!(from, advertised);
    }

    #[test]
    fn unknown_family_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut out = TcpStream::connect(addr).unwrap();
        let (mut inc, _) = listener.accept().unwrap();

        out.write_all(&[0xabu8; 8]).unwrap();
        assert!(matches!(
            recv(&mut inc),
            Err(Error::Hello(peer::DecodeError::Family(0xab)))
        ));
    }
}
