//! Trellis is a small peer-to-peer overlay toolkit: a message-framed,
//! datagram-like transport over per-peer TCP streams, and a gossip-based
//! topology manager that shapes each peer's neighborhood around an
//! application-supplied preference function.
//!
//! The two halves meet at the host's event loop: the topology engine
//! emits messages through an outbox, the host hands them to the
//! transport, and inbound buffers flow back into the engine.

#[cfg(feature = "trellis-common")]
pub use trellis_common as common;

#[cfg(feature = "trellis-net")]
pub use trellis_net as net;

#[cfg(feature = "trellis-topo")]
pub use trellis_topo as topo;
