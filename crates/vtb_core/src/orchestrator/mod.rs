//! Batch orchestration.
//!
//! This module provides:
//! - `ModelFactory` / `TranslationStages`: collaborator traits
//! - `BatchRunner`: sequential per-item loop with failure isolation
//! - `run_worker`: the full worker lifecycle
//!
//! # Architecture
//!
//! ```text
//! ProcessContext::establish
//!        │
//!        ▼
//!  resolve_pairs → partition ──(empty)──────────────┐
//!        │                                          │
//!        ▼                                          │
//!  ModelFactory::load_models (once)                 │
//!        │                                          │
//!        ▼                                          │
//!  BatchRunner::run ── per item ──┐                 │
//!        │            keyframes   │                 │
//!        │            full seq.   │                 │
//!        │            ◄───────────┘                 │
//!        ▼                                          │
//!  ProcessContext::teardown ◄───────────────────────┘
//! ```

mod errors;
mod runner;
mod stage;
mod types;
mod worker;

pub use errors::{
    error_chain, ItemError, ItemResult, StageError, StageResult, WorkerError, WorkerResult,
};
pub use runner::{item_output_dir, BatchRunner};
pub use stage::{ItemContext, KeyframeId, ModelFactory, Stage, TranslationStages};
pub use types::{ItemFailure, PhaseTracker, RunSummary, WorkerPhase};
pub use worker::{run_worker, WorkerOptions, WorkerReport};
