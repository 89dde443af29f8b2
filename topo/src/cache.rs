//! Ranked, bounded neighbor cache.
//!
//! Entries are `(peer, metadata)` pairs with a uniform metadata width,
//! kept ordered by the host's rank function against a target metadata
//! blob. The cache is bounded: ranked insertion fails when full, and
//! ranked merging selects the best entries from two caches into a fresh
//! one.

use std::cmp::Ordering;

use thiserror::Error;
use trellis_common::peer::{self, PeerId};

/// Orders two metadata blobs by how well they match a target:
/// `rank(target, a, b)` is `Less` when `a` fits `target` better than `b`.
pub type Ranker = dyn Fn(&[u8], &[u8], &[u8]) -> Ordering;

/// Error inserting into a cache.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// The cache is at capacity.
    #[error("cache is full")]
    Full,
    /// The peer is already cached.
    #[error("peer is already cached")]
    Duplicate,
    /// The metadata width differs from the cache's.
    #[error("metadata is {0} bytes, cache holds {1}-byte entries")]
    MetaSize(usize, usize),
}

/// Error decoding a dumped cache.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The dump ended early.
    #[error("truncated cache dump")]
    Truncated,
    /// An entry's peer id failed to decode.
    #[error(transparent)]
    Peer(#[from] peer::DecodeError),
}

/// One cached neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The neighbor.
    pub id: PeerId,
    /// Its advertised metadata.
    pub meta: Vec<u8>,
    /// Epochs since the entry was last refreshed.
    pub age: u32,
}

/// A bounded sequence of neighbors in rank order.
#[derive(Debug, Clone)]
pub struct PeerCache {
    entries: Vec<Entry>,
    capacity: usize,
    meta_size: usize,
}

impl PeerCache {
    /// An empty cache for `capacity` entries of `meta_size`-byte metadata.
    pub fn new(capacity: usize, meta_size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            meta_size,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Uniform metadata width of the entries.
    pub fn meta_size(&self) -> usize {
        self.meta_size
    }

    /// Number of cached neighbors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no neighbors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at rank position `index`.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Iterate entries in rank order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.entries.iter().any(|e| e.id == *id)
    }

    /// The neighbors' metadata, concatenated in rank order.
    pub fn metadata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * self.meta_size);
        for entry in &self.entries {
            out.extend_from_slice(&entry.meta);
        }
        out
    }

    /// Insert `id` at its rank position against `target_meta`.
    ///
    /// Returns the position. Fails when the cache is full, the peer is
    /// already present, or the metadata width is off.
    pub fn add_ranked(
        &mut self,
        id: PeerId,
        meta: &[u8],
        rank: &Ranker,
        target_meta: &[u8],
    ) -> Result<usize, AddError> {
        if meta.len() != self.meta_size {
            return Err(AddError::MetaSize(meta.len(), self.meta_size));
        }
        if self.contains(&id) {
            return Err(AddError::Duplicate);
        }
        if self.entries.len() >= self.capacity {
            return Err(AddError::Full);
        }

        let position = self
            .entries
            .iter()
            .position(|e| rank(target_meta, meta, &e.meta) == Ordering::Less)
            .unwrap_or(self.entries.len());

        self.entries.insert(
            position,
            Entry {
                id,
                meta: meta.to_vec(),
                age: 0,
            },
        );
        Ok(position)
    }

    /// Merge `self` and `other` into a fresh cache of `capacity`, ranked
    /// against `target_meta`.
    ///
    /// Local entries keep their age; remote entries arrive fresh, and a
    /// remote copy of a shared peer refreshes its metadata when the bytes
    /// differ. The flag reports whether anything from `other` made it into
    /// the result (a new peer, or refreshed metadata) — the "useful
    /// exchange" signal the gossip loop keys its idle logic on.
    pub fn merge_ranked(
        &self,
        other: &PeerCache,
        capacity: usize,
        rank: &Ranker,
        target_meta: &[u8],
    ) -> (PeerCache, bool) {
        let mut pool: Vec<(Entry, bool)> = self
            .entries
            .iter()
            .map(|e| (e.clone(), false))
            .collect();

        if other.meta_size == self.meta_size {
            for remote in &other.entries {
                match pool.iter_mut().find(|(e, _)| e.id == remote.id) {
                    Some((local, from_remote)) => {
                        if local.meta != remote.meta {
                            local.meta = remote.meta.clone();
                            local.age = 0;
                            *from_remote = true;
                        }
                    }
                    None => {
                        let mut entry = remote.clone();
                        entry.age = 0;
                        pool.push((entry, true));
                    }
                }
            }
        }

        pool.sort_by(|(a, _), (b, _)| rank(target_meta, &a.meta, &b.meta));
        pool.truncate(capacity);

        let adopted = pool.iter().any(|(_, from_remote)| *from_remote);
        let entries = pool.into_iter().map(|(e, _)| e).collect();

        (
            PeerCache {
                entries,
                capacity,
                meta_size: self.meta_size,
            },
            adopted,
        )
    }

    /// Uniform random choice among the best `pool` entries.
    pub fn rand_peer(&self, rng: &fastrand::Rng, pool: usize) -> Option<&Entry> {
        let bound = self.entries.len().min(pool);
        if bound == 0 {
            return None;
        }
        self.entries.get(rng.usize(..bound))
    }

    /// Age every entry by one epoch.
    pub fn update(&mut self) {
        for entry in &mut self.entries {
            entry.age = entry.age.saturating_add(1);
        }
    }

    /// Wire form: entry count, metadata width, then `(peer dump, metadata)`
    /// per entry in rank order. At most `limit` entries are dumped.
    pub fn dump(&self, limit: usize) -> Vec<u8> {
        let count = self.entries.len().min(limit);
        let mut out = Vec::new();

        out.extend_from_slice(&(count as u32).to_be_bytes());
        out.extend_from_slice(&(self.meta_size as u32).to_be_bytes());
        for entry in self.entries.iter().take(count) {
            dump_entry(&mut out, &entry.id, &entry.meta);
        }
        out
    }

    /// Rebuild a cache from its wire form. The result is sized to exactly
    /// the dumped entries; ages start at zero.
    pub fn undump(buf: &[u8]) -> Result<PeerCache, DecodeError> {
        let count = read_u32(buf, 0)? as usize;
        let meta_size = read_u32(buf, 4)? as usize;
        let mut offset = 8;

        // The smallest possible entry bounds how many the buffer can
        // actually hold; a dump announcing more is lying.
        let min_entry = peer::DUMP_LEN_V4 + meta_size;
        if count.saturating_mul(min_entry.max(1)) > buf.len().saturating_sub(offset) {
            return Err(DecodeError::Truncated);
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let (id, used) = peer::undump(&buf[offset.min(buf.len())..])?;
            offset += used;

            let meta = buf
                .get(offset..offset + meta_size)
                .ok_or(DecodeError::Truncated)?;
            offset += meta_size;

            entries.push(Entry {
                id,
                meta: meta.to_vec(),
                age: 0,
            });
        }

        Ok(PeerCache {
            capacity: count.max(1),
            meta_size,
            entries,
        })
    }
}

/// Append one dumped entry. Shared with the gossip framing, which prepends
/// the local node as entry zero.
pub(crate) fn dump_entry(out: &mut Vec<u8>, id: &PeerId, meta: &[u8]) {
    out.extend_from_slice(&peer::dump(id));
    out.extend_from_slice(meta);
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or(DecodeError::Truncated)?;

    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
