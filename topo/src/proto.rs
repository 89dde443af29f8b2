//! Gossip message framing.
//!
//! Every gossip message opens with a two-byte header — the overlay
//! protocol tag and the message kind — followed by a dumped view of the
//! sender's cache in which the sender itself is always entry zero. The
//! receiving engine reads that first entry to learn who is gossiping.

use thiserror::Error;
use trellis_common::peer::PeerId;

use crate::cache::{self, PeerCache};

/// Protocol tag identifying topology gossip on the overlay.
pub const MSG_TYPE_TOPO: u8 = 0x13;

/// Gossip header length.
pub const HEADER_LEN: usize = 2;

/// Gossip message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// A view offer that requests a view in return.
    Query,
    /// The view returned for a query.
    Reply,
}

impl MsgKind {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Query),
            0x02 => Some(Self::Reply),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Self::Query => 0x01,
            Self::Reply => 0x02,
        }
    }
}

/// Framing or validation error.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// The message is shorter than a header.
    #[error("truncated gossip header")]
    Truncated,
    /// The protocol tag is not ours.
    #[error("wrong protocol tag {0:#04x}")]
    Protocol(u8),
    /// The kind byte is neither query nor reply.
    #[error("unknown message kind {0:#04x}")]
    Kind(u8),
    /// The metadata width differs from what this node advertises.
    #[error("metadata is {0} bytes, expected {1}")]
    MetaSize(usize, usize),
    /// The dumped view failed to decode.
    #[error("cache dump: {0}")]
    Cache(#[from] cache::DecodeError),
}

/// Local endpoint of the gossip protocol: who we are and the metadata we
/// advertise as entry zero of every outgoing view.
#[derive(Debug)]
pub struct TopoProto {
    me: PeerId,
    my_meta: Vec<u8>,
}

impl TopoProto {
    /// A protocol endpoint advertising `meta` for `me`.
    pub fn new(me: PeerId, meta: Vec<u8>) -> Self {
        Self { me, my_meta: meta }
    }

    /// The local peer.
    pub fn me(&self) -> PeerId {
        self.me
    }

    /// The advertised metadata.
    pub fn my_meta(&self) -> &[u8] {
        &self.my_meta
    }

    /// Replace the advertised metadata. The width is fixed at creation;
    /// changing it would desynchronize every cache built from our views.
    pub fn metadata_update(&mut self, meta: &[u8]) -> Result<(), ProtoError> {
        if meta.len() != self.my_meta.len() {
            return Err(ProtoError::MetaSize(meta.len(), self.my_meta.len()));
        }
        self.my_meta.clear();
        self.my_meta.extend_from_slice(meta);
        Ok(())
    }

    /// Encode a gossip message carrying up to `limit` view entries after
    /// ourselves.
    pub fn encode(&self, kind: MsgKind, view: &PeerCache, limit: usize) -> Vec<u8> {
        let count = view.len().min(limit);
        let mut out = Vec::new();

        out.push(MSG_TYPE_TOPO);
        out.push(kind.to_wire());
        out.extend_from_slice(&(count as u32 + 1).to_be_bytes());
        out.extend_from_slice(&(self.my_meta.len() as u32).to_be_bytes());
        cache::dump_entry(&mut out, &self.me, &self.my_meta);
        for entry in view.entries().take(count) {
            cache::dump_entry(&mut out, &entry.id, &entry.meta);
        }
        out
    }

    /// Decode and validate a gossip message into its kind and the remote
    /// view (sender first).
    pub fn decode(buf: &[u8]) -> Result<(MsgKind, PeerCache), ProtoError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtoError::Truncated);
        }
        if buf[0] != MSG_TYPE_TOPO {
            return Err(ProtoError::Protocol(buf[0]));
        }
        let kind = MsgKind::from_wire(buf[1]).ok_or(ProtoError::Kind(buf[1]))?;
        let remote = PeerCache::undump(&buf[HEADER_LEN..])?;

        Ok((kind, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn id(port: u16) -> PeerId {
        ([10, 1, 1, 1], port).into()
    }

    fn flat(_: &[u8], _: &[u8], _: &[u8]) -> Ordering {
        Ordering::Equal
    }

    #[test]
    fn sender_is_entry_zero() {
        let proto = TopoProto::new(id(1), vec![42]);
        let mut view = PeerCache::new(4, 1);
        view.add_ranked(id(2), &[7], &flat, &[0]).unwrap();

        let bytes = proto.encode(MsgKind::Query, &view, 10);
        let (kind, remote) = TopoProto::decode(&bytes).unwrap();

        assert_eq!(kind, MsgKind::Query);
        assert_eq!(remote.len(), 2);
        assert_eq!(remote.get(0).unwrap().id, id(1));
        assert_eq!(remote.get(0).unwrap().meta, vec![42]);
        assert_eq!(remote.get(1).unwrap().id, id(2));
    }

    #[test]
    fn view_limit_is_applied() {
        let proto = TopoProto::new(id(1), vec![0]);
        let mut view = PeerCache::new(8, 1);
        for port in 2..=6 {
            view.add_ranked(id(port), &[port as u8], &flat, &[0]).unwrap();
        }

        let bytes = proto.encode(MsgKind::Reply, &view, 2);
        let (_, remote) = TopoProto::decode(&bytes).unwrap();

        // Ourselves plus two view entries.
        assert_eq!(remote.len(), 3);
    }

    #[test]
    fn foreign_protocols_and_kinds_are_rejected() {
        let proto = TopoProto::new(id(1), vec![0]);
        let bytes = proto.encode(MsgKind::Query, &PeerCache::new(1, 1), 10);

        let mut wrong_tag = bytes.clone();
        wrong_tag[0] = 0xaa;
        assert!(matches!(
            TopoProto::decode(&wrong_tag),
            Err(ProtoError::Protocol(0xaa))
        ));

        let mut wrong_kind = bytes;
        wrong_kind[1] = 0x7f;
        assert!(matches!(
            TopoProto::decode(&wrong_kind),
            Err(ProtoError::Kind(0x7f))
        ));

        assert!(matches!(
            TopoProto::decode(&[MSG_TYPE_TOPO]),
            Err(ProtoError::Truncated)
        ));
    }

    #[test]
    fn metadata_update_keeps_the_width() {
        let mut proto = TopoProto::new(id(1), vec![1, 2]);

        proto.metadata_update(&[3, 4]).unwrap();
        assert_eq!(proto.my_meta(), &[3, 4]);

        assert!(matches!(
            proto.metadata_update(&[5]),
            Err(ProtoError::MetaSize(1, 2))
        ));
    }
}
