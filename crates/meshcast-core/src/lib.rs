//! meshcast-core — shared types, wire schema, and configuration.
//! All other Meshcast crates depend on this one.

pub mod chunk;
pub mod config;
pub mod wire;

pub use chunk::{ChunkState, ChunkVideo};
pub use wire::{Message, PeerAddr, SendTarget};
