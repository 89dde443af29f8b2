//! Neighbor dictionary.
//!
//! Maps advertised peer addresses to their clients. Lookup never fails on
//! the send path: an unknown address gets a fresh, empty client slot that
//! persists across reconnects.

use std::collections::HashMap;

use trellis_common::config::Tags;
use trellis_common::peer::PeerId;

use crate::client::Client;

/// Capacity hint when the host configures none.
const DEFAULT_CAPACITY: usize = 64;

/// Configuration tag carrying the capacity hint.
const TAG_DICT_SIZE: &str = "dict_size";

/// The `addr → client` table.
#[derive(Debug)]
pub struct Dictionary {
    clients: HashMap<PeerId, Client>,
}

impl Dictionary {
    /// Create a dictionary, honoring the `dict_size` sizing hint.
    pub fn new(tags: &Tags) -> Self {
        let capacity = tags.int_default(TAG_DICT_SIZE, DEFAULT_CAPACITY as i64);

        Self {
            clients: HashMap::with_capacity(capacity.max(0) as usize),
        }
    }

    /// Look up a neighbor, creating an empty client on first sight.
    pub fn get_or_create(&mut self, addr: PeerId) -> &mut Client {
        self.clients.entry(addr).or_default()
    }

    /// Look up a neighbor without creating it.
    pub fn get_mut(&mut self, addr: &PeerId) -> Option<&mut Client> {
        self.clients.get_mut(addr)
    }

    /// Iterate over `(addr, client)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &Client)> {
        self.clients.iter()
    }

    /// Iterate mutably over `(addr, client)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PeerId, &mut Client)> {
        self.clients.iter_mut().map(|(addr, client)| (addr, client))
    }

    /// Number of known neighbors.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether any neighbor is known.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Evict invalid neighbors whose idle deadline has passed, returning
    /// how many were dropped. Correctness never depends on this; it only
    /// bounds table growth for long-lived nodes.
    pub fn prune_idle(&mut self) -> usize {
        let before = self.clients.len();

        self.clients
            .retain(|_, client| client.valid() || !client.idle_expired());
        before - self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_idempotent() {
        let mut dict = Dictionary::new(&Tags::default());
        let addr: PeerId = ([127, 0, 0, 1], 7000).into();

        let first = dict.get_or_create(addr) as *const Client;
        let second = dict.get_or_create(addr) as *const Client;

        assert_eq!(first, second);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn distinct_addresses_get_distinct_slots() {
        let mut dict = Dictionary::new(&Tags::default());

        dict.get_or_create(([127, 0, 0, 1], 7000).into());
        dict.get_or_create(([127, 0, 0, 1], 7001).into());

        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn honors_the_sizing_hint() {
        let tags = Tags::parse("dict_size=4").unwrap();
        let dict = Dictionary::new(&tags);

        assert!(dict.is_empty());
    }
}
