//! Per-node chunk storage — the source of truth for "what do I have."
//!
//! The buffer is a plain id-ordered map with no size bound and no
//! eviction policy of its own; windowing decisions belong to the engine.
//! Absent ids are not errors: querying any id reports `Missed`.

use std::collections::BTreeMap;

use meshcast_core::{ChunkState, ChunkVideo};

use crate::policy::Window;

#[derive(Debug)]
struct Slot {
    chunk: ChunkVideo,
    state: ChunkState,
}

/// Mapping from chunk id to the stored chunk and how it was obtained.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: BTreeMap<u32, Slot>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk. Returns false and leaves the buffer unchanged if
    /// the id is already present — a duplicate never overwrites.
    pub fn add_chunk(&mut self, chunk: ChunkVideo, state: ChunkState) -> bool {
        match self.chunks.entry(chunk.id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Slot { chunk, state });
                true
            }
        }
    }

    pub fn has_chunk(&self, id: u32) -> bool {
        self.chunks.contains_key(&id)
    }

    /// Copy of the stored chunk. Callers never get a reference into the
    /// buffer, so stored state cannot be mutated from outside.
    pub fn get_chunk(&self, id: u32) -> Option<ChunkVideo> {
        self.chunks.get(&id).map(|slot| slot.chunk.clone())
    }

    /// Remove a chunk. Returns false if the id was absent.
    pub fn del_chunk(&mut self, id: u32) -> bool {
        self.chunks.remove(&id).is_some()
    }

    /// State of an id, present or not. Absent ids are `Missed`.
    pub fn state(&self, id: u32) -> ChunkState {
        self.chunks
            .get(&id)
            .map(|slot| slot.state)
            .unwrap_or(ChunkState::Missed)
    }

    /// Reclassify a stored chunk in place. No-op if the id is absent.
    pub fn set_state(&mut self, id: u32, state: ChunkState) {
        if let Some(slot) = self.chunks.get_mut(&id) {
            slot.state = state;
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Largest id currently stored.
    pub fn latest_id(&self) -> Option<u32> {
        self.chunks.keys().next_back().copied()
    }

    /// Largest id present inside the window.
    pub fn latest_in(&self, window: Window) -> Option<u32> {
        self.chunks.range(window.range()).next_back().map(|(id, _)| *id)
    }

    /// Ids present inside the window, ascending.
    pub fn present_in(&self, window: Window) -> impl Iterator<Item = u32> + '_ {
        self.chunks.range(window.range()).map(|(id, _)| *id)
    }

    /// Count of ids in the window whose state is not `Missed` — the
    /// numerator of the pull completeness ratio.
    pub fn received_in(&self, window: Window) -> u32 {
        self.chunks
            .range(window.range())
            .filter(|(_, slot)| slot.state != ChunkState::Missed)
            .count() as u32
    }

    /// Ids in the window whose state is `Missed`, ascending. Covers both
    /// absent ids and stored chunks reclassified as missed.
    pub fn missed_in(&self, window: Window) -> impl Iterator<Item = u32> + '_ {
        window.ids().filter(move |&id| self.state(id) == ChunkState::Missed)
    }

    /// Smallest missed id in `[base, base + size)`.
    pub fn least_missed_in(&self, window: Window) -> Option<u32> {
        self.missed_in(window).next()
    }

    /// Largest missed id in `[base, base + size)`.
    pub fn latest_missed_in(&self, window: Window) -> Option<u32> {
        self.missed_in(window).last()
    }

    /// Drop every chunk below the window base. Called by the engine as
    /// the playout window advances; returns how many were evicted.
    pub fn evict_below(&mut self, base: u32) -> usize {
        let keep = self.chunks.split_off(&base);
        let evicted = self.chunks.len();
        self.chunks = keep;
        evicted
    }
}
