//! Peer- and chunk-selection policies.
//!
//! Pure functions from (neighbor set, buffer, window) to a target peer
//! or chunk id. Policies never mutate state and never look outside the
//! playout window — chunks older than the window are not worth
//! recovering and are skipped everywhere.

use meshcast_core::config::{ChunkPolicyKind, PeerPolicyKind};
use meshcast_core::PeerAddr;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::buffer::ChunkBuffer;
use crate::neighbor::NeighborSet;

/// The playout window: chunk ids `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub base: u32,
    pub size: u32,
}

impl Window {
    /// Exclusive end of the window, saturating at the id space limit.
    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, id: u32) -> bool {
        id >= self.base && id < self.end()
    }

    pub fn range(&self) -> std::ops::Range<u32> {
        self.base..self.end()
    }

    /// Every id in the window, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        self.range()
    }
}

/// Link-quality oracle, supplied by the radio/transport collaborator.
/// The SINR-weighted peer policy only consumes it.
pub trait LinkQuality {
    /// Estimated SINR toward a peer, in linear scale. `None` when the
    /// collaborator has no estimate for this link.
    fn sinr(&self, addr: PeerAddr) -> Option<f64>;
}

/// No link-quality information available; every link looks alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLinkQuality;

impl LinkQuality for NoLinkQuality {
    fn sinr(&self, _addr: PeerAddr) -> Option<f64> {
        None
    }
}

/// Choose a pull target among the currently-active neighbors.
/// Returns `None` when there is no candidate.
pub fn select_peer<R: Rng + ?Sized>(
    kind: PeerPolicyKind,
    neighbors: &NeighborSet,
    quality: &dyn LinkQuality,
    rng: &mut R,
) -> Option<PeerAddr> {
    let candidates: Vec<PeerAddr> = neighbors.active().map(|(addr, _)| addr).collect();
    if candidates.is_empty() {
        return None;
    }

    match kind {
        PeerPolicyKind::Random => candidates.choose(rng).copied(),
        PeerPolicyKind::SinrWeighted => {
            let weighted: Vec<(PeerAddr, f64)> = candidates
                .iter()
                .map(|&addr| (addr, quality.sinr(addr).unwrap_or(0.0).max(0.0)))
                .collect();
            if weighted.iter().all(|(_, w)| *w <= 0.0) {
                // No usable estimates — fall back to a uniform draw.
                return candidates.choose(rng).copied();
            }
            weighted
                .choose_weighted(rng, |(_, w)| *w)
                .ok()
                .map(|(addr, _)| *addr)
        }
    }
}

/// Choose the next chunk id to generate, relay, or request.
/// Returns `None` when the window holds nothing the policy can use.
pub fn select_chunk(
    kind: ChunkPolicyKind,
    buffer: &ChunkBuffer,
    window: Window,
    neighbors: &NeighborSet,
    last_generated: u32,
) -> Option<u32> {
    match kind {
        ChunkPolicyKind::NewChunk => Some(last_generated.saturating_add(1)),
        ChunkPolicyKind::Latest => buffer.latest_in(window),
        ChunkPolicyKind::LeastMissed => buffer.least_missed_in(window),
        ChunkPolicyKind::LatestMissed => buffer.latest_missed_in(window),
        ChunkPolicyKind::LeastUseful => {
            // A chunk's marginal value is estimated as the number of
            // active neighbors whose advertised latest id is below it.
            let mut best: Option<(usize, u32)> = None;
            for id in buffer.present_in(window) {
                let value = neighbors
                    .active()
                    .filter(|(_, data)| data.latest_chunk < id)
                    .count();
                if best.map_or(true, |(least, _)| value < least) {
                    best = Some((value, id));
                }
            }
            best.map(|(_, id)| id)
        }
    }
}
