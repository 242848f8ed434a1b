//! Worker lifecycle and run results.

use std::fmt;
use std::time::Duration;

use crate::distributed::WorkerIdentity;

/// Lifecycle phase of a worker.
///
/// ```text
/// Uninitialized → ContextEstablished → ModelsLoaded → Running → Drained → TornDown
///                        └──────────── no items ────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerPhase {
    Uninitialized,
    ContextEstablished,
    ModelsLoaded,
    Running,
    Drained,
    TornDown,
}

impl WorkerPhase {
    /// Whether `next` may follow this phase.
    pub fn can_advance_to(self, next: WorkerPhase) -> bool {
        use WorkerPhase::*;
        matches!(
            (self, next),
            (Uninitialized, ContextEstablished)
                | (ContextEstablished, ModelsLoaded)
                | (ContextEstablished, Drained)
                | (ModelsLoaded, Running)
                | (Running, Drained)
                | (Drained, TornDown)
        )
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerPhase::Uninitialized => "uninitialized",
            WorkerPhase::ContextEstablished => "context established",
            WorkerPhase::ModelsLoaded => "models loaded",
            WorkerPhase::Running => "running",
            WorkerPhase::Drained => "drained",
            WorkerPhase::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Records the phases a worker went through.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    history: Vec<WorkerPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            history: vec![WorkerPhase::Uninitialized],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> WorkerPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(WorkerPhase::Uninitialized)
    }

    pub fn advance(&mut self, next: WorkerPhase) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "illegal worker transition {} -> {}",
            current,
            next
        );
        tracing::trace!("Worker phase: {} -> {}", current, next);
        self.history.push(next);
    }

    pub fn history(&self) -> &[WorkerPhase] {
        &self.history
    }
}

/// One failed item in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of running a worker's items.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub identity: WorkerIdentity,
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            succeeded: Vec::new(),
            failed: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_success(&mut self, name: impl Into<String>) {
        self.succeeded.push(name.into());
    }

    pub fn record_failure(&mut self, name: impl Into<String>, error: impl Into<String>) {
        self.failed.push(ItemFailure {
            name: name.into(),
            error: error.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Log the summary through `tracing`.
    pub fn log(&self) {
        tracing::info!(
            "{}: {} of {} items succeeded in {:.1}s",
            self.identity,
            self.succeeded.len(),
            self.total(),
            self.elapsed.as_secs_f64()
        );
        for failure in &self.failed {
            tracing::warn!("{}: {} failed: {}", self.identity, failure.name, failure.error);
        }
    }
}
