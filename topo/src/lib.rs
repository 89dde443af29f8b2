//! Gossip-based topology management.
//!
//! The engine shapes a peer's neighborhood toward the host's preference:
//! neighbors live in a bounded cache ordered by a caller-supplied rank
//! function, and ranked views are periodically exchanged with one random
//! neighbor. The engine is transport-agnostic — it emits [`engine::Io`]
//! values the host forwards to its transport, and consumes inbound
//! buffers through [`engine::Engine::parse_data`].
#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod proto;

pub use cache::{Entry, PeerCache, Ranker};
pub use engine::{Engine, Event, Io};
pub use proto::{MsgKind, TopoProto, MSG_TYPE_TOPO};
pub use trellis_common::peer::PeerId;
