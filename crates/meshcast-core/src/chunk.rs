//! Chunk value types.
//!
//! A chunk is the unit of dissemination: an identified, fixed-metadata
//! slice of the video stream. Identity is the numeric id alone — two
//! chunks with the same id are the same chunk, whatever their payloads.

use std::cmp::Ordering;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How a chunk id came to be known to the local buffer.
///
/// `Missed` is never stored — it is the implicit state reported for any
/// id the buffer does not contain, so state queries always succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Arrived unsolicited via a broadcast push.
    ReceivedPush,
    /// Arrived as the answer to one of our Pull requests.
    ReceivedPull,
    /// Not present.
    Missed,
}

/// An immutable video chunk.
///
/// Copied by value across the protocol boundary; nothing hands out a
/// reference into a buffer's stored copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVideo {
    /// Unique per Source, monotonically increasing.
    pub id: u32,

    /// Nominal chunk size in bytes.
    pub size: u32,

    /// Generation time, milliseconds since stream start.
    pub timestamp: u64,

    /// Size of codec attributes carried alongside the payload.
    pub attributes_size: u32,

    /// Opaque payload. Codec semantics are out of scope.
    pub payload: Bytes,
}

impl ChunkVideo {
    /// Create a chunk with an empty payload.
    pub fn new(id: u32, timestamp: u64, size: u32) -> Self {
        Self {
            id,
            size,
            timestamp,
            attributes_size: 0,
            payload: Bytes::new(),
        }
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }
}

// Equality and ordering are keyed on id alone.

impl PartialEq for ChunkVideo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChunkVideo {}

impl PartialOrd for ChunkVideo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkVideo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for ChunkVideo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_id_alone() {
        let a = ChunkVideo::new(7, 100, 1400);
        let b = ChunkVideo::new(7, 999, 64).with_payload(Bytes::from_static(b"x"));
        assert_eq!(a, b);

        let c = ChunkVideo::new(8, 100, 1400);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn ordering_follows_id() {
        let mut chunks = vec![
            ChunkVideo::new(3, 0, 0),
            ChunkVideo::new(1, 0, 0),
            ChunkVideo::new(2, 0, 0),
        ];
        chunks.sort();
        let ids: Vec<u32> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
