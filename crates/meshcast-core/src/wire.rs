//! Wire schema for the dissemination protocol.
//!
//! Three message kinds: Chunk (unsolicited broadcast push, also the
//! answer to a Pull), Pull (unicast request for one missing chunk id),
//! and Hello (payload-free liveness beacon). The layout is logical, not
//! bit-exact — messages are serde structs carried as JSON datagrams.

use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkVideo;

/// Upper bound on an encoded datagram: payload plus header slack.
pub const MAX_DATAGRAM: usize = 65536;

/// A peer's identity on the mesh: link-local address plus the OS
/// interface index it was heard on. Two peers on different interfaces
/// are different neighbors even if the address collides.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeerAddr {
    pub addr: Ipv6Addr,
    pub ifindex: u32,
}

impl PeerAddr {
    pub fn new(addr: Ipv6Addr, ifindex: u32) -> Self {
        Self { addr, ifindex }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%{}", self.addr, self.ifindex)
    }
}

/// Target for message sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SendTarget {
    /// Broadcast to every peer on the link.
    #[default]
    Broadcast,

    /// Unicast to a specific peer.
    #[serde(rename = "peer")]
    Peer { addr: PeerAddr },
}

/// A protocol message as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A video chunk, pushed or pulled.
    Chunk { chunk: ChunkVideo },

    /// Request for one missing chunk, answered with a unicast Chunk.
    Pull { chunk_id: u32 },

    /// Liveness beacon. Presence alone is the signal.
    Hello,
}

impl Message {
    /// Message kind as a static label, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Pull { .. } => "pull",
            Self::Hello => "hello",
        }
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("message serialization failed")
    }

    /// Deserialize from bytes. Malformed datagrams are the caller's to
    /// drop — a decode failure is never fatal to the receive path.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        if data.len() > MAX_DATAGRAM {
            return Err(WireError::Oversized(data.len()));
        }
        serde_json::from_slice(data).map_err(WireError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {0} bytes exceeds MAX_DATAGRAM")]
    Oversized(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
