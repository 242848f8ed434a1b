//! VTB Core - Backend logic for Video Translate Batch
//!
//! This crate contains the batch orchestrator: deterministic pairing of
//! videos with prompt files, rank-based partitioning, worker lifecycle
//! management and fault-isolated per-item execution. The translation
//! pipeline itself is consumed through the traits in [`orchestrator`].

pub mod bridge;
pub mod config;
pub mod distributed;
pub mod encode;
pub mod jobs;
pub mod logging;
pub mod orchestrator;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
