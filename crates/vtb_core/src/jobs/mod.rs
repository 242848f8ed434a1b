//! Work discovery and partitioning.
//!
//! This module provides:
//! - `WorkItem`: An immutable (video, prompt file) pair
//! - `resolve_pairs`: Deterministic pairing of videos with prompt files
//! - `partition`: Round-robin ownership of items by worker index

mod discovery;
mod partition;
mod types;

pub use discovery::{
    resolve_pairs, resolve_pairs_detailed, DiscoveryError, PairingReport, MEDIA_EXTENSIONS,
    PROMPT_EXTENSION,
};
pub use partition::{owned_positions, partition, PartitionError};
pub use types::WorkItem;
