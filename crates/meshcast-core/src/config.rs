//! Configuration system for Meshcast.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshcast/config.toml
//!   3. ~/.config/meshcast/config.toml
//!
//! Every knob is a typed field enumerated here — there is no string-keyed
//! attribute lookup anywhere in the engine.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Role of this node in the stream, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Generates and pushes new chunks.
    Source,
    /// Relays received chunks and pulls back what it missed.
    #[default]
    Peer,
}

/// Strategy for choosing which neighbor to pull from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerPolicyKind {
    /// Uniform choice among active neighbors.
    #[default]
    Random,
    /// Biased toward neighbors with the best known link quality.
    SinrWeighted,
}

/// Strategy for choosing which chunk id to push, relay, or request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicyKind {
    /// `last_generated + 1`. Only meaningful for the Source.
    NewChunk,
    /// Most recent id present in the playout window.
    Latest,
    /// Present id with the lowest estimated marginal value to neighbors.
    LeastUseful,
    /// Largest missed id in the playout window.
    LatestMissed,
    /// Smallest missed id in the playout window.
    #[default]
    LeastMissed,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshcastConfig {
    pub node: NodeConfig,
    pub stream: StreamConfig,
    pub pull: PullConfig,
    pub hello: HelloConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: PeerRole,
    /// Network interface name. Empty = first argument / auto-detect.
    pub interface: String,
    /// Link-local address of the stream source, if known in advance.
    /// Peers seed their neighbor set with it so the pull path has a
    /// target before the first Hello arrives.
    pub source_addr: Option<Ipv6Addr>,
    pub peer_policy: PeerPolicyKind,
    pub chunk_policy: ChunkPolicyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream bitrate in bits per second.
    pub data_rate: u64,
    /// Nominal chunk size in bytes. One chunk per push period.
    pub packet_size: u32,
    /// Uniform jitter added to each push period, as a fraction of it.
    pub jitter_factor: f64,
    /// Playout window length in chunk ids. Chunks older than the window
    /// are not worth recovering.
    pub window_size: u32,
}

impl StreamConfig {
    /// Base push period: the time one chunk occupies at the data rate.
    pub fn push_period(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.packet_size) * 8.0 / self.data_rate as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    pub active: bool,
    /// Pull timer period in milliseconds.
    pub time_ms: u64,
    /// Max pull attempts per chunk id before it is abandoned.
    pub max: u32,
    /// Enter pull recovery when window completeness drops below this.
    pub ratio_min: f64,
    /// Leave pull recovery once window completeness exceeds this.
    pub ratio_max: f64,
    /// Max pull requests answered per slot. Requests beyond the cap are
    /// silently dropped — the requester's retry logic absorbs it.
    pub reply_max: u32,
    /// Reply-accounting slot length in milliseconds.
    pub slot_ms: u64,
}

impl PullConfig {
    pub fn time(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }

    pub fn slot(&self) -> Duration {
        Duration::from_millis(self.slot_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloConfig {
    pub active: bool,
    /// Hello beacon period in milliseconds.
    pub time_ms: u64,
    /// Consecutive silent hello periods before a neighbor is dropped.
    pub loss: u32,
}

impl HelloConfig {
    pub fn time(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: PeerRole::Peer,
            interface: String::new(),
            source_addr: None,
            peer_policy: PeerPolicyKind::Random,
            chunk_policy: ChunkPolicyKind::LeastMissed,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            data_rate: 1_000_000,
            packet_size: 1400,
            jitter_factor: 0.02,
            window_size: 32,
        }
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            active: true,
            time_ms: 100,
            max: 3,
            ratio_min: 0.70,
            ratio_max: 0.90,
            reply_max: 4,
            slot_ms: 200,
        }
    }
}

impl Default for HelloConfig {
    fn default() -> Self {
        Self {
            active: true,
            time_ms: 1000,
            loss: 3,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("meshcast")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading & validation ──────────────────────────────────────────────────────

impl MeshcastConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshcastConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHCAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshcastConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.data_rate == 0 {
            return Err(ConfigError::Invalid("stream.data_rate must be nonzero".into()));
        }
        if self.stream.packet_size == 0 {
            return Err(ConfigError::Invalid("stream.packet_size must be nonzero".into()));
        }
        if self.stream.window_size == 0 {
            return Err(ConfigError::Invalid("stream.window_size must be nonzero".into()));
        }
        if self.stream.jitter_factor < 0.0 {
            return Err(ConfigError::Invalid("stream.jitter_factor must not be negative".into()));
        }
        if !(self.pull.ratio_min > 0.0
            && self.pull.ratio_min < self.pull.ratio_max
            && self.pull.ratio_max <= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "pull ratios must satisfy 0 < ratio_min < ratio_max <= 1, got {} / {}",
                self.pull.ratio_min, self.pull.ratio_max
            )));
        }
        if self.pull.active && (self.pull.time_ms == 0 || self.pull.slot_ms == 0) {
            return Err(ConfigError::Invalid("pull.time_ms and pull.slot_ms must be nonzero".into()));
        }
        if self.hello.active && self.hello.time_ms == 0 {
            return Err(ConfigError::Invalid("hello.time_ms must be nonzero".into()));
        }
        if self.hello.active && self.hello.loss == 0 {
            return Err(ConfigError::Invalid("hello.loss must be at least 1".into()));
        }
        if self.node.role == PeerRole::Peer
            && self.node.chunk_policy == ChunkPolicyKind::NewChunk
        {
            return Err(ConfigError::Invalid(
                "chunk_policy = new_chunk generates ids and is only valid for the source".into(),
            ));
        }
        Ok(())
    }

    /// Apply MESHCAST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESHCAST_NODE__ROLE") {
            match v.as_str() {
                "source" => self.node.role = PeerRole::Source,
                "peer" => self.node.role = PeerRole::Peer,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("MESHCAST_NODE__INTERFACE") {
            self.node.interface = v;
        }
        if let Ok(v) = std::env::var("MESHCAST_NODE__SOURCE_ADDR") {
            if let Ok(addr) = v.parse() {
                self.node.source_addr = Some(addr);
            }
        }
        if let Ok(v) = std::env::var("MESHCAST_STREAM__DATA_RATE") {
            if let Ok(n) = v.parse() {
                self.stream.data_rate = n;
            }
        }
        if let Ok(v) = std::env::var("MESHCAST_STREAM__PACKET_SIZE") {
            if let Ok(n) = v.parse() {
                self.stream.packet_size = n;
            }
        }
        if let Ok(v) = std::env::var("MESHCAST_PULL__ACTIVE") {
            self.pull.active = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("MESHCAST_PULL__MAX") {
            if let Ok(n) = v.parse() {
                self.pull.max = n;
            }
        }
        if let Ok(v) = std::env::var("MESHCAST_HELLO__ACTIVE") {
            self.hello.active = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("MESHCAST_HELLO__LOSS") {
            if let Ok(n) = v.parse() {
                self.hello.loss = n;
            }
        }
    }
}
