//! The gossip engine.
//!
//! Each peer keeps a bounded cache of neighbors ranked by the host's
//! similarity function and periodically trades ranked views with one
//! neighbor. Productive exchanges keep the engine active; a run of
//! unproductive ones slows the period down and eventually idles the
//! engine, which then waits for the host-supplied bootstrap list to
//! re-seed it.
//!
//! The engine never touches the transport. Outgoing messages and
//! notifications accumulate in an outbox drained through the `Iterator`
//! impl; the host forwards every [`Io::Send`] to its transport and feeds
//! inbound buffers back through [`Engine::parse_data`].

use std::collections::VecDeque;
use std::fmt;

use log::{debug, warn};
use thiserror::Error;
use trellis_common::peer::PeerId;
use trellis_common::time::{Clock, LocalDuration, LocalTime};

use crate::cache::{self, PeerCache, Ranker};
use crate::proto::{MsgKind, ProtoError, TopoProto};

/// Initial cache capacity.
pub const INIT_PEERS: usize = 20;
/// Candidates considered when choosing a gossip target.
pub const MAX_PREFERRED_PEERS: usize = 10;
/// View entries sent to the chosen peer.
pub const MAX_GOSSIPING_PEERS: usize = 10;
/// Unproductive exchanges tolerated before going idle.
pub const IDLE_TIME: u32 = 10;
/// Gossip period while the neighborhood is still forming.
pub const INIT_PERIOD: LocalDuration = LocalDuration::from_secs(1);
/// Gossip period once exchanges stop being productive.
pub const STD_PERIOD: LocalDuration = LocalDuration::from_secs(3);

/// Outbound I/O and notifications drained by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Io {
    /// Hand `message` to the transport, addressed to `to`.
    Send {
        /// The gossip target.
        to: PeerId,
        /// The encoded gossip message.
        message: Vec<u8>,
    },
    /// Something observable happened.
    Event(Event),
}

/// Coarse engine notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The engine stopped gossiping until re-seeded.
    WentIdle,
    /// The bootstrap list revived an idle engine.
    Reseeded,
    /// The local view absorbed a new peer or fresher metadata.
    ViewChanged,
}

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// An inbound message violated the gossip protocol.
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// A neighbor could not be inserted.
    #[error("cannot add neighbor: {0}")]
    Add(#[from] cache::AddError),
    /// A resize is already waiting for the next merge.
    #[error("a resize is already pending")]
    ResizePending,
    /// The resize amount is out of range.
    #[error("invalid resize amount {0}")]
    Resize(usize),
}

/// The gossip state machine, generic over its clock.
pub struct Engine<C> {
    cache: PeerCache,
    proto: TopoProto,
    rank: Box<Ranker>,
    /// Target capacity applied by the next merge.
    cache_size: usize,
    initial_capacity: usize,
    gossip_peers: usize,
    active: u32,
    resize_pending: bool,
    last_gossip: LocalTime,
    period: LocalDuration,
    clock: C,
    rng: fastrand::Rng,
    outbox: VecDeque<Io>,
}

impl<C> fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("me", &self.proto.me())
            .field("neighbors", &self.cache.len())
            .field("cache_size", &self.cache_size)
            .field("active", &self.active)
            .finish()
    }
}

impl<C> Iterator for Engine<C> {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbox.pop_front()
    }
}

impl<C: Clock> Engine<C> {
    /// Create an engine gossiping as `me` with the given advertised
    /// metadata and rank function. `gossip_peers` overrides the default
    /// view size when non-zero.
    pub fn new(
        me: PeerId,
        meta: Vec<u8>,
        rank: Box<Ranker>,
        gossip_peers: usize,
        rng: fastrand::Rng,
        clock: C,
    ) -> Self {
        let cache = PeerCache::new(INIT_PEERS, meta.len());
        let last_gossip = clock.local_time();

        Self {
            cache,
            proto: TopoProto::new(me, meta),
            rank,
            cache_size: INIT_PEERS,
            initial_capacity: INIT_PEERS,
            gossip_peers: if gossip_peers > 0 {
                gossip_peers
            } else {
                MAX_GOSSIPING_PEERS
            },
            active: IDLE_TIME,
            resize_pending: false,
            last_gossip,
            period: INIT_PERIOD,
            clock,
            rng,
            outbox: VecDeque::new(),
        }
    }

    /// The local peer.
    pub fn local_id(&self) -> PeerId {
        self.proto.me()
    }

    /// The metadata this peer advertises.
    pub fn my_metadata(&self) -> &[u8] {
        self.proto.my_meta()
    }

    /// Whether the engine still emits periodic gossip.
    pub fn is_active(&self) -> bool {
        self.active > 0
    }

    /// Remaining unproductive exchanges before the engine idles.
    pub fn active_counter(&self) -> u32 {
        self.active
    }

    /// The capacity the next merge will apply.
    pub fn cache_size_target(&self) -> usize {
        self.cache_size
    }

    /// Whether a grow/shrink awaits the next merge.
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Process one inbound gossip buffer, then run the periodic send path.
    ///
    /// Call with an empty buffer to drive the send path alone. `bootstrap`
    /// is the host-supplied peer list used to re-seed an idle engine.
    pub fn parse_data(
        &mut self,
        data: &[u8],
        bootstrap: &[(PeerId, Vec<u8>)],
    ) -> Result<(), Error> {
        if !data.is_empty() {
            self.receive(data)?;
        }
        if self.time_to_send() {
            self.gossip(bootstrap);
        }
        Ok(())
    }

    /// Copy up to `n` of the best neighbors with their metadata.
    ///
    /// Fewer than `n` available demotes the engine to idle, so the next
    /// period re-seeds from the bootstrap list.
    pub fn give_peers(&mut self, n: usize) -> Vec<(PeerId, Vec<u8>)> {
        let out: Vec<_> = self
            .cache
            .entries()
            .take(n)
            .map(|e| (e.id, e.meta.clone()))
            .collect();

        if out.len() < n {
            self.go_idle();
        }
        out
    }

    /// Number of cached neighbors.
    pub fn neighborhood_size(&self) -> usize {
        self.cache.len()
    }

    /// Observe the neighborhood in rank order, without the idle demotion
    /// [`Engine::give_peers`] applies on shortage.
    pub fn neighbors(&self) -> impl Iterator<Item = (PeerId, &[u8])> {
        self.cache.entries().map(|e| (e.id, e.meta.as_slice()))
    }

    /// Insert a neighbor, ranked against our own metadata.
    pub fn add_neighbor(&mut self, id: PeerId, meta: &[u8]) -> Result<(), Error> {
        let my_meta = self.proto.my_meta().to_vec();

        self.cache.add_ranked(id, meta, &self.rank, &my_meta)?;
        Ok(())
    }

    /// The neighbors' concatenated metadata and its width.
    pub fn metadata(&self) -> (Vec<u8>, usize) {
        (self.cache.metadata(), self.cache.meta_size())
    }

    /// Replace the metadata this peer advertises. The width is fixed.
    pub fn change_metadata(&mut self, meta: &[u8]) -> Result<(), Error> {
        self.proto.metadata_update(meta)?;
        Ok(())
    }

    /// Raise the target capacity by up to `n`, bounded by doubling per
    /// call and by twice the initial capacity overall. Only one resize may
    /// wait for a merge at a time.
    pub fn grow_neighborhood(&mut self, n: usize) -> Result<usize, Error> {
        if self.resize_pending {
            return Err(Error::ResizePending);
        }
        let headroom = (2 * self.initial_capacity).saturating_sub(self.cache_size);
        let step = n.min(self.cache_size).min(headroom);

        if n == 0 || step == 0 {
            return Err(Error::Resize(n));
        }
        self.cache_size += step;
        self.resize_pending = true;

        Ok(self.cache_size)
    }

    /// Lower the target capacity by `n`, which must leave at least one
    /// slot. Only one resize may wait for a merge at a time.
    pub fn shrink_neighborhood(&mut self, n: usize) -> Result<usize, Error> {
        if self.resize_pending {
            return Err(Error::ResizePending);
        }
        if n == 0 || n >= self.cache_size {
            return Err(Error::Resize(n));
        }
        self.cache_size -= n;
        self.resize_pending = true;

        Ok(self.cache_size)
    }

    /// A fresh cache at the target capacity holding every neighbor except
    /// `exclude`, ranked against `target_meta`.
    fn rank_view(&self, exclude: &PeerId, target_meta: &[u8]) -> PeerCache {
        let mut view = PeerCache::new(self.cache_size, self.cache.meta_size());

        for entry in self.cache.entries() {
            if entry.id != *exclude {
                // The view is a selection; insertion can only fail once
                // the capacity is reached.
                let _ = view.add_ranked(entry.id, &entry.meta, &self.rank, target_meta);
            }
        }
        view
    }

    fn receive(&mut self, data: &[u8]) -> Result<(), Error> {
        let (kind, remote) = TopoProto::decode(data)?;

        if remote.meta_size() != self.cache.meta_size() {
            warn!(
                target: "topo",
                "metadata width mismatch: local {} != received {}",
                self.cache.meta_size(),
                remote.meta_size()
            );
            return Ok(());
        }
        let Some(sender) = remote.get(0).cloned() else {
            warn!(target: "topo", "gossip message carries no sender entry");
            return Ok(());
        };

        debug!(target: "topo", "{:?} from {}", kind, sender.id);

        if kind == MsgKind::Query {
            let view = self.rank_view(&sender.id, &sender.meta);
            let message = self.proto.encode(MsgKind::Reply, &view, self.gossip_peers);

            self.outbox.push_back(Io::Send {
                to: sender.id,
                message,
            });
        }

        let my_meta = self.proto.my_meta().to_vec();
        let inserted = self
            .cache
            .add_ranked(sender.id, &sender.meta, &self.rank, &my_meta)
            .is_ok();
        let (merged, adopted) =
            self.cache
                .merge_ranked(&remote, self.cache_size, &self.rank, &my_meta);
        self.cache = merged;

        if inserted || adopted {
            self.active = IDLE_TIME;
            self.outbox.push_back(Io::Event(Event::ViewChanged));
        } else {
            self.period = STD_PERIOD;
            if self.active > 0 {
                self.active -= 1;
                if self.active == 0 {
                    self.outbox.push_back(Io::Event(Event::WentIdle));
                }
            }
        }
        self.resize_pending = false;

        Ok(())
    }

    /// Whether a gossip period elapsed. The epoch advances even while
    /// idle, so a re-seeded engine resumes on schedule instead of
    /// bursting.
    fn time_to_send(&mut self) -> bool {
        let now = self.clock.local_time();

        if now - self.last_gossip > self.period {
            self.last_gossip += self.period;
            return true;
        }
        false
    }

    fn gossip(&mut self, bootstrap: &[(PeerId, Vec<u8>)]) {
        self.cache.update();

        if self.active == 0 {
            self.reseed(bootstrap);
            if self.active == 0 {
                // Still nothing worth gossiping about.
                return;
            }
        }

        let Some(target) = self
            .cache
            .rand_peer(&self.rng, MAX_PREFERRED_PEERS)
            .cloned()
        else {
            warn!(target: "topo", "no neighbor to gossip with");
            return;
        };

        let view = self.rank_view(&target.id, &target.meta);
        let message = self.proto.encode(MsgKind::Query, &view, self.gossip_peers);

        self.outbox.push_back(Io::Send {
            to: target.id,
            message,
        });
    }

    /// Rebuild activity from the host-supplied peer list. Adopting
    /// anything restores the full active budget.
    fn reseed(&mut self, bootstrap: &[(PeerId, Vec<u8>)]) {
        if bootstrap.is_empty() {
            return;
        }
        let my_meta = self.proto.my_meta().to_vec();
        let mut seeds = PeerCache::new(bootstrap.len(), self.cache.meta_size());

        for (id, meta) in bootstrap {
            match seeds.add_ranked(*id, meta, &self.rank, &my_meta) {
                Ok(_) | Err(cache::AddError::Duplicate) => {}
                Err(cache::AddError::Full) => break,
                Err(err) => {
                    warn!(target: "topo", "skipping bootstrap peer {}: {}", id, err);
                }
            }
        }
        if seeds.is_empty() {
            return;
        }

        let (merged, adopted) =
            self.cache
                .merge_ranked(&seeds, self.cache_size, &self.rank, &my_meta);
        self.cache = merged;
        self.resize_pending = false;

        if adopted {
            self.active = IDLE_TIME;
            self.outbox.push_back(Io::Event(Event::Reseeded));
        }
    }

    fn go_idle(&mut self) {
        if self.active > 0 {
            self.active = 0;
            self.outbox.push_back(Io::Event(Event::WentIdle));
        }
    }
}
