//! Per-peer statistics.
//!
//! Each engine owns its counters; on shutdown it publishes a snapshot
//! into the shared registry for an external collector to aggregate.
//! There is no process-wide mutable state anywhere.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// Counters for one peer's run.
#[derive(Debug, Default, Clone)]
pub struct PeerStats {
    pub chunks_pushed: u64,
    pub chunks_relayed: u64,
    pub chunks_received: u64,
    pub duplicates: u64,
    pub hellos_sent: u64,
    pub hellos_received: u64,
    pub neighbors_expired: u64,
    pub pulls_sent: u64,
    pub pulls_answered: u64,
    pub pulls_dropped_at_cap: u64,
    pub pulls_recovered: u64,
    pub pulls_abandoned: u64,
    pull_latency_total: Duration,
    pull_latency_samples: u64,
}

impl PeerStats {
    /// Record how long a pull took from first attempt to delivery.
    pub fn record_pull_latency(&mut self, latency: Duration) {
        self.pull_latency_total += latency;
        self.pull_latency_samples += 1;
    }

    /// Mean pull recovery latency, if any pull completed.
    pub fn mean_pull_latency(&self) -> Option<Duration> {
        (self.pull_latency_samples > 0)
            .then(|| self.pull_latency_total / self.pull_latency_samples as u32)
    }

    /// Emit a one-line summary of this run.
    pub fn log_summary(&self, peer: &str) {
        tracing::info!(
            peer,
            pushed = self.chunks_pushed,
            relayed = self.chunks_relayed,
            received = self.chunks_received,
            duplicates = self.duplicates,
            pulls_sent = self.pulls_sent,
            pulls_recovered = self.pulls_recovered,
            pulls_abandoned = self.pulls_abandoned,
            pulls_answered = self.pulls_answered,
            pulls_dropped_at_cap = self.pulls_dropped_at_cap,
            neighbors_expired = self.neighbors_expired,
            mean_pull_latency_ms =
                self.mean_pull_latency().map(|d| d.as_millis() as u64).unwrap_or(0),
            "peer run summary"
        );
    }
}

/// Shared per-run registry of peer snapshots, keyed by peer name.
#[derive(Debug, Clone, Default)]
pub struct StatsRegistry {
    inner: Arc<DashMap<String, PeerStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a peer's snapshot, replacing any earlier one.
    pub fn publish(&self, peer: impl Into<String>, stats: PeerStats) {
        self.inner.insert(peer.into(), stats);
    }

    pub fn get(&self, peer: &str) -> Option<PeerStats> {
        self.inner.get(peer).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sum of recovered pulls across all published peers.
    pub fn total_recovered(&self) -> u64 {
        self.inner.iter().map(|entry| entry.pulls_recovered).sum()
    }
}
