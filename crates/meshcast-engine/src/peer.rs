//! StreamingPeer — the push/pull protocol engine.
//!
//! One peer is one task: a single select loop over inbound messages, the
//! jittered push timer, and the hello/pull/slot intervals. All state
//! mutation happens inside that loop, so the buffer and neighbor set
//! need no locking. The transport collaborator owns the far ends of the
//! two channels; a closed channel is a terminal condition for the peer.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration, Instant};

use meshcast_core::config::{ChunkPolicyKind, ConfigError, MeshcastConfig, PeerRole};
use meshcast_core::{ChunkState, ChunkVideo, Message, PeerAddr, SendTarget};

use crate::buffer::ChunkBuffer;
use crate::neighbor::NeighborSet;
use crate::policy::{self, LinkQuality, NoLinkQuality, Window};
use crate::stats::{PeerStats, StatsRegistry};

/// Pull recovery mode, switched by hysteresis on window completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    Inactive,
    Active,
}

/// The protocol engine for one node.
pub struct StreamingPeer {
    name: String,
    config: MeshcastConfig,
    epoch: Instant,

    buffer: ChunkBuffer,
    neighbors: NeighborSet,
    stats: PeerStats,
    quality: Box<dyn LinkQuality + Send>,
    rng: StdRng,
    registry: Option<StatsRegistry>,

    outbound: mpsc::Sender<(SendTarget, Message)>,
    inbound: mpsc::Receiver<(PeerAddr, Message)>,
    shutdown: broadcast::Receiver<()>,

    pull_mode: PullMode,
    /// Outstanding pull requests: chunk id → time the request went out.
    pending: HashMap<u32, Instant>,
    retries: HashMap<u32, u32>,
    first_attempt: HashMap<u32, Instant>,
    abandoned: HashSet<u32>,
    replies_this_slot: u32,

    last_generated: u32,
    highest_seen: u32,
    last_hello_tick: Instant,
}

impl StreamingPeer {
    /// Build a peer from a validated configuration and its transport
    /// channels. The engine sends on `outbound` and receives on
    /// `inbound`; the transport collaborator owns the far ends.
    pub fn new(
        name: impl Into<String>,
        config: MeshcastConfig,
        outbound: mpsc::Sender<(SendTarget, Message)>,
        inbound: mpsc::Receiver<(PeerAddr, Message)>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            name: name.into(),
            config,
            epoch: now,
            buffer: ChunkBuffer::new(),
            neighbors: NeighborSet::new(),
            stats: PeerStats::default(),
            quality: Box::new(NoLinkQuality),
            rng: StdRng::from_entropy(),
            registry: None,
            outbound,
            inbound,
            shutdown,
            pull_mode: PullMode::Inactive,
            pending: HashMap::new(),
            retries: HashMap::new(),
            first_attempt: HashMap::new(),
            abandoned: HashSet::new(),
            replies_this_slot: 0,
            last_generated: 0,
            highest_seen: 0,
            last_hello_tick: now,
        })
    }

    /// Seed the neighbor set with the stream source so the pull path
    /// has a target before the first Hello arrives.
    pub fn with_source(mut self, source: PeerAddr) -> Self {
        self.neighbors.touch(source, None, Instant::now());
        self
    }

    /// Install a link-quality oracle for the SINR-weighted peer policy.
    pub fn with_link_quality(mut self, quality: Box<dyn LinkQuality + Send>) -> Self {
        self.quality = quality;
        self
    }

    /// Publish the final stats snapshot into `registry` on shutdown.
    pub fn with_stats_registry(mut self, registry: StatsRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Fix the RNG seed for reproducible jitter and selection.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn pull_mode(&self) -> PullMode {
        self.pull_mode
    }

    /// Run until shutdown or a terminal transport error. The final
    /// stats snapshot is published and returned either way.
    pub async fn run(mut self) -> Result<PeerStats> {
        let result = self.run_inner().await;
        self.stats.log_summary(&self.name);
        if let Some(registry) = &self.registry {
            registry.publish(self.name.clone(), self.stats.clone());
        }
        result.map(|_| self.stats)
    }

    async fn run_inner(&mut self) -> Result<()> {
        enum Event {
            Shutdown,
            Inbound(Option<(PeerAddr, Message)>),
            Push,
            Hello,
            Pull,
            Slot,
        }

        let push_period = self.config.stream.push_period();
        let mut push_timer = Box::pin(time::sleep(self.jittered(push_period)));
        let mut hello_timer = interval_if(self.config.hello.active, self.config.hello.time());
        let mut pull_timer = interval_if(self.config.pull.active, self.config.pull.time());
        let mut slot_timer = interval_if(self.config.pull.active, self.config.pull.slot());
        self.last_hello_tick = Instant::now();

        tracing::info!(
            peer = %self.name,
            role = ?self.config.node.role,
            push_period_ms = push_period.as_millis() as u64,
            pull = self.config.pull.active,
            hello = self.config.hello.active,
            "peer starting"
        );

        loop {
            let event = tokio::select! {
                _ = self.shutdown.recv() => Event::Shutdown,
                inbound = self.inbound.recv() => Event::Inbound(inbound),
                _ = &mut push_timer => Event::Push,
                _ = hello_timer.tick(), if self.config.hello.active => Event::Hello,
                _ = pull_timer.tick(), if self.config.pull.active => Event::Pull,
                _ = slot_timer.tick(), if self.config.pull.active => Event::Slot,
            };

            match event {
                Event::Shutdown => {
                    tracing::info!(peer = %self.name, "shutdown received");
                    return Ok(());
                }
                Event::Inbound(Some((from, message))) => self.on_message(from, message).await?,
                Event::Inbound(None) => bail!("inbound transport channel closed"),
                Event::Push => {
                    self.on_push_tick().await?;
                    let next = self.jittered(push_period);
                    push_timer.as_mut().reset(Instant::now() + next);
                }
                Event::Hello => self.on_hello_tick().await?,
                Event::Pull => self.on_pull_tick().await?,
                Event::Slot => self.replies_this_slot = 0,
            }
        }
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    async fn on_message(&mut self, from: PeerAddr, message: Message) -> Result<()> {
        match message {
            Message::Chunk { chunk } => self.on_chunk(from, chunk),
            Message::Pull { chunk_id } => self.on_pull_request(from, chunk_id).await?,
            Message::Hello => {
                self.touch_neighbor(from, None);
                self.stats.hellos_received += 1;
            }
        }
        Ok(())
    }

    fn on_chunk(&mut self, from: PeerAddr, chunk: ChunkVideo) {
        let id = chunk.id;
        self.touch_neighbor(from, Some(id));
        self.note_seen(id);

        // A chunk clears a pending pull only for its own id: the stored
        // state records how this id was actually obtained.
        let was_pending = self.pending.remove(&id).is_some();
        if was_pending {
            self.retries.remove(&id);
            if let Some(first) = self.first_attempt.remove(&id) {
                self.stats.record_pull_latency(first.elapsed());
            }
            self.stats.pulls_recovered += 1;
        }

        let state = if was_pending {
            ChunkState::ReceivedPull
        } else {
            ChunkState::ReceivedPush
        };
        if self.buffer.add_chunk(chunk, state) {
            self.stats.chunks_received += 1;
            tracing::trace!(peer = %self.name, chunk = id, from = %from, pulled = was_pending, "chunk stored");
        } else {
            self.stats.duplicates += 1;
            tracing::trace!(peer = %self.name, chunk = id, from = %from, "duplicate chunk");
        }
    }

    async fn on_pull_request(&mut self, from: PeerAddr, chunk_id: u32) -> Result<()> {
        self.touch_neighbor(from, None);

        if self.replies_this_slot >= self.config.pull.reply_max {
            // Load shedding: no reply, no error. The requester retries.
            self.stats.pulls_dropped_at_cap += 1;
            tracing::trace!(peer = %self.name, chunk = chunk_id, from = %from, "pull dropped at slot cap");
            return Ok(());
        }

        match self.buffer.get_chunk(chunk_id) {
            Some(chunk) => {
                self.send(SendTarget::Peer { addr: from }, Message::Chunk { chunk })
                    .await?;
                self.replies_this_slot += 1;
                self.stats.pulls_answered += 1;
                tracing::debug!(peer = %self.name, chunk = chunk_id, to = %from, "pull answered");
            }
            None => {
                tracing::trace!(peer = %self.name, chunk = chunk_id, from = %from, "pull for chunk we do not hold");
            }
        }
        Ok(())
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    async fn on_push_tick(&mut self) -> Result<()> {
        match self.config.node.role {
            PeerRole::Source => {
                let Some(id) = policy::select_chunk(
                    ChunkPolicyKind::NewChunk,
                    &self.buffer,
                    self.window(),
                    &self.neighbors,
                    self.last_generated,
                ) else {
                    return Ok(());
                };
                let timestamp = self.epoch.elapsed().as_millis() as u64;
                let chunk = ChunkVideo::new(id, timestamp, self.config.stream.packet_size);
                self.buffer.add_chunk(chunk.clone(), ChunkState::ReceivedPush);
                self.last_generated = id;
                self.note_seen(id);
                self.send(SendTarget::Broadcast, Message::Chunk { chunk }).await?;
                self.stats.chunks_pushed += 1;
                tracing::debug!(peer = %self.name, chunk = id, "chunk pushed");
            }
            PeerRole::Peer => {
                if self.buffer.is_empty() {
                    return Ok(());
                }
                let Some(id) = policy::select_chunk(
                    self.relay_policy(),
                    &self.buffer,
                    self.window(),
                    &self.neighbors,
                    self.last_generated,
                ) else {
                    return Ok(());
                };
                let Some(chunk) = self.buffer.get_chunk(id) else {
                    return Ok(());
                };
                self.send(SendTarget::Broadcast, Message::Chunk { chunk }).await?;
                self.stats.chunks_relayed += 1;
                tracing::trace!(peer = %self.name, chunk = id, "chunk relayed");
            }
        }
        Ok(())
    }

    async fn on_hello_tick(&mut self) -> Result<()> {
        self.send(SendTarget::Broadcast, Message::Hello).await?;
        self.stats.hellos_sent += 1;

        let removed = self
            .neighbors
            .expire_silent(self.last_hello_tick, self.config.hello.loss);
        for addr in &removed {
            tracing::debug!(peer = %self.name, neighbor = %addr, "neighbor expired after hello loss");
        }
        self.stats.neighbors_expired += removed.len() as u64;
        self.last_hello_tick = Instant::now();
        Ok(())
    }

    async fn on_pull_tick(&mut self) -> Result<()> {
        if self.highest_seen == 0 {
            // Nothing known about the stream yet, nothing to recover.
            return Ok(());
        }
        let window = self.window();

        // An outstanding request older than one pull period counts as
        // unanswered; the id becomes eligible for another attempt.
        let timeout = self.config.pull.time();
        self.pending.retain(|_, sent| sent.elapsed() < timeout);

        let ratio = f64::from(self.buffer.received_in(window)) / f64::from(window.size);
        self.update_pull_mode(ratio);
        if self.pull_mode != PullMode::Active {
            return Ok(());
        }

        let Some(id) = self.next_pull_target(window) else {
            return Ok(());
        };
        let Some(target) = policy::select_peer(
            self.config.node.peer_policy,
            &self.neighbors,
            self.quality.as_ref(),
            &mut self.rng,
        ) else {
            tracing::trace!(peer = %self.name, chunk = id, "no pull target available");
            return Ok(());
        };

        self.send(SendTarget::Peer { addr: target }, Message::Pull { chunk_id: id })
            .await?;
        let now = Instant::now();
        self.pending.insert(id, now);
        let attempt = self.retries.entry(id).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        self.first_attempt.entry(id).or_insert(now);
        self.stats.pulls_sent += 1;
        tracing::debug!(peer = %self.name, chunk = id, target = %target, attempt, "pull sent");
        Ok(())
    }

    // ── Pull state machine ────────────────────────────────────────────────────

    fn update_pull_mode(&mut self, ratio: f64) {
        match self.pull_mode {
            PullMode::Inactive if ratio < self.config.pull.ratio_min => {
                self.pull_mode = PullMode::Active;
                tracing::debug!(peer = %self.name, ratio, "entering pull recovery");
            }
            PullMode::Active if ratio > self.config.pull.ratio_max => {
                self.pull_mode = PullMode::Inactive;
                tracing::debug!(peer = %self.name, ratio, "leaving pull recovery");
            }
            _ => {}
        }
    }

    /// Next missed id worth pulling: skips ids with an outstanding
    /// request and abandons ids that exhausted their retry budget.
    fn next_pull_target(&mut self, window: Window) -> Option<u32> {
        let latest_first = self.config.node.chunk_policy == ChunkPolicyKind::LatestMissed;
        let missed: Vec<u32> = self.buffer.missed_in(window).collect();

        let mut candidate = None;
        for id in missed {
            if self.pending.contains_key(&id) {
                continue;
            }
            if self.retries.get(&id).copied().unwrap_or(0) >= self.config.pull.max {
                if self.abandoned.insert(id) {
                    self.stats.pulls_abandoned += 1;
                    tracing::debug!(peer = %self.name, chunk = id, "pull abandoned after retry cap");
                }
                continue;
            }
            candidate = Some(id);
            if !latest_first {
                break;
            }
        }
        candidate
    }

    // ── Window & bookkeeping ──────────────────────────────────────────────────

    /// The trailing playout window, ending at the highest id seen from
    /// any evidence. Early in the stream the window is shorter than
    /// configured — ids the source has not generated yet are not missed.
    fn window(&self) -> Window {
        let size = self.config.stream.window_size.min(self.highest_seen);
        if size == 0 {
            return Window { base: 1, size: 0 };
        }
        Window {
            base: self.highest_seen - size + 1,
            size,
        }
    }

    /// Advance the playout window past a newly seen id. Pull
    /// bookkeeping is strictly window-scoped; buffer eviction trails by
    /// one full window span so a neighbor whose window lags slightly
    /// can still pull chunks we no longer consider worth recovering.
    fn note_seen(&mut self, id: u32) {
        if id <= self.highest_seen {
            return;
        }
        self.highest_seen = id;
        let window = self.window();
        let cutoff = window.base.saturating_sub(window.size);
        let evicted = self.buffer.evict_below(cutoff);
        if evicted > 0 {
            tracing::trace!(peer = %self.name, cutoff, evicted, "window advanced");
        }
        let base = window.base;
        self.pending.retain(|id, _| *id >= base);
        self.retries.retain(|id, _| *id >= base);
        self.first_attempt.retain(|id, _| *id >= base);
        self.abandoned.retain(|id| *id >= base);
    }

    /// A relay can only send what it holds; the missed-targeting
    /// policies direct the pull path instead.
    fn relay_policy(&self) -> ChunkPolicyKind {
        match self.config.node.chunk_policy {
            ChunkPolicyKind::LeastMissed | ChunkPolicyKind::LatestMissed => ChunkPolicyKind::Latest,
            other => other,
        }
    }

    fn touch_neighbor(&mut self, from: PeerAddr, latest_chunk: Option<u32>) {
        if self.neighbors.touch(from, latest_chunk, Instant::now()) {
            tracing::debug!(peer = %self.name, neighbor = %from, "neighbor discovered");
        }
    }

    fn jittered(&mut self, period: Duration) -> Duration {
        period + period.mul_f64(self.config.stream.jitter_factor * self.rng.gen::<f64>())
    }

    async fn send(&mut self, target: SendTarget, message: Message) -> Result<()> {
        if self.outbound.send((target, message)).await.is_err() {
            bail!("outbound transport channel closed");
        }
        Ok(())
    }
}

/// Interval for a feature that may be disabled. Disabled intervals are
/// never polled (the select branch is gated), but creation must not
/// panic on a zero period.
fn interval_if(active: bool, period: Duration) -> time::Interval {
    time::interval(if active { period } else { Duration::from_secs(86400) })
}
