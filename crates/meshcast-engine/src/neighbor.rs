//! Neighbor registry — per-peer liveness and activity metadata.
//!
//! A neighbor comes into existence on the first message of any kind
//! heard from it and is refreshed on every subsequent one. Removal is
//! either explicit or via hello-loss expiry; false negatives from
//! transient loss are accepted.

use std::collections::HashMap;

use tokio::time::Instant;

use meshcast_core::PeerAddr;

/// What we currently believe about a neighbor's liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activity {
    /// Heard from, never classified.
    #[default]
    Unknown,
    /// Contact within the current hello period.
    Active,
    /// Missed at least one hello period.
    Inactive,
}

/// Tracked state for one neighbor.
#[derive(Debug, Clone)]
pub struct NeighborData {
    pub first_seen: Instant,
    pub last_contact: Instant,
    /// Highest chunk id this neighbor is known to hold.
    pub latest_chunk: u32,
    pub activity: Activity,
    /// Consecutive hello periods with no contact.
    pub hello_misses: u32,
}

impl NeighborData {
    pub fn new(now: Instant) -> Self {
        Self {
            first_seen: now,
            last_contact: now,
            latest_chunk: 0,
            activity: Activity::Unknown,
            hello_misses: 0,
        }
    }
}

/// Mapping from peer address to tracked neighbor state.
#[derive(Debug, Default)]
pub struct NeighborSet {
    peers: HashMap<PeerAddr, NeighborData>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_neighbor(&self, addr: PeerAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    /// Track a new neighbor. Returns false if it is already present —
    /// use `update` or `touch` for existing entries, not re-add.
    pub fn add(&mut self, addr: PeerAddr, data: NeighborData) -> bool {
        match self.peers.entry(addr) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(data);
                true
            }
        }
    }

    pub fn get(&self, addr: PeerAddr) -> Option<&NeighborData> {
        self.peers.get(&addr)
    }

    /// Mutate a tracked neighbor through a closure. Returns false if
    /// the neighbor is unknown. Mutable access goes through here so no
    /// caller ever holds a live reference into the set.
    pub fn update(&mut self, addr: PeerAddr, mutate: impl FnOnce(&mut NeighborData)) -> bool {
        match self.peers.get_mut(&addr) {
            Some(data) => {
                mutate(data);
                true
            }
            None => false,
        }
    }

    /// Remove a neighbor. Returns false if it was not tracked.
    pub fn del(&mut self, addr: PeerAddr) -> bool {
        self.peers.remove(&addr).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerAddr, &NeighborData)> {
        self.peers.iter().map(|(addr, data)| (*addr, data))
    }

    /// Neighbors eligible as pull targets: contacted and not expired.
    pub fn active(&self) -> impl Iterator<Item = (PeerAddr, &NeighborData)> {
        self.iter().filter(|(_, data)| data.activity == Activity::Active)
    }

    /// Record contact from a peer: create it on first sight, refresh
    /// `last_contact` and the advertised latest chunk otherwise. Any
    /// contact makes the neighbor active and clears its miss counter.
    /// Returns true if the neighbor was newly created.
    pub fn touch(&mut self, addr: PeerAddr, latest_chunk: Option<u32>, now: Instant) -> bool {
        let created = !self.peers.contains_key(&addr);
        let data = self.peers.entry(addr).or_insert_with(|| NeighborData::new(now));
        data.last_contact = now;
        data.activity = Activity::Active;
        data.hello_misses = 0;
        if let Some(id) = latest_chunk {
            data.latest_chunk = data.latest_chunk.max(id);
        }
        created
    }

    /// One hello period elapsed: charge a miss to every neighbor silent
    /// since `since` and drop those reaching `max_misses`. Returns the
    /// removed neighbors for logging.
    pub fn expire_silent(&mut self, since: Instant, max_misses: u32) -> Vec<PeerAddr> {
        let mut removed = Vec::new();
        self.peers.retain(|addr, data| {
            if data.last_contact >= since {
                return true;
            }
            data.hello_misses += 1;
            data.activity = Activity::Inactive;
            if data.hello_misses >= max_misses {
                removed.push(*addr);
                false
            } else {
                true
            }
        });
        removed
    }
}
