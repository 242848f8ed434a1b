//! Worker identity from the launcher's environment.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ContextError;

/// Global worker index.
pub const RANK_VAR: &str = "RANK";
/// Total number of workers.
pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
/// Device index on the local machine.
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";

/// Who this process is within the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub index: usize,
    pub total_workers: usize,
    pub device_index: usize,
}

impl WorkerIdentity {
    /// Identity of a lone worker.
    pub fn single(device_index: usize) -> Self {
        Self {
            index: 0,
            total_workers: 1,
            device_index,
        }
    }

    /// Worker 0 prints batch-level banners.
    pub fn is_leader(&self) -> bool {
        self.index == 0
    }

    /// Tag used for per-worker log files.
    pub fn file_tag(&self) -> String {
        format!("worker-{}", self.index)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {}/{} (device {})",
            self.index, self.total_workers, self.device_index
        )
    }
}

/// Where the identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Launcher variables were present; a coordination group is required.
    Environment,
    /// No launcher variables; running as a single worker.
    Fallback,
}

/// Identity plus how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedIdentity {
    pub identity: WorkerIdentity,
    pub source: IdentitySource,
}

impl DetectedIdentity {
    pub fn is_distributed(&self) -> bool {
        self.source == IdentitySource::Environment
    }
}

/// Read the identity from the process environment.
pub fn detect_identity(fallback_device: usize) -> Result<DetectedIdentity, ContextError> {
    detect_identity_with(|name| std::env::var(name).ok(), fallback_device)
}

/// Read the identity through `lookup`.
///
/// Distributed mode requires both `RANK` and `WORLD_SIZE`; `LOCAL_RANK` is
/// then mandatory as well.
pub fn detect_identity_with<F>(
    lookup: F,
    fallback_device: usize,
) -> Result<DetectedIdentity, ContextError>
where
    F: Fn(&str) -> Option<String>,
{
    let rank = lookup(RANK_VAR);
    let world = lookup(WORLD_SIZE_VAR);

    let (rank, world) = match (rank, world) {
        (Some(rank), Some(world)) => (rank, world),
        (None, None) => {
            return Ok(DetectedIdentity {
                identity: WorkerIdentity::single(fallback_device),
                source: IdentitySource::Fallback,
            })
        }
        (rank, _) => {
            let present = if rank.is_some() { RANK_VAR } else { WORLD_SIZE_VAR };
            tracing::warn!(
                "Only {} is set; both {} and {} are needed for distributed mode",
                present,
                RANK_VAR,
                WORLD_SIZE_VAR
            );
            return Ok(DetectedIdentity {
                identity: WorkerIdentity::single(fallback_device),
                source: IdentitySource::Fallback,
            });
        }
    };

    let index = parse_var(RANK_VAR, &rank)?;
    let total_workers = parse_var(WORLD_SIZE_VAR, &world)?;
    let local = lookup(LOCAL_RANK_VAR).ok_or(ContextError::MissingVariable(LOCAL_RANK_VAR))?;
    let device_index = parse_var(LOCAL_RANK_VAR, &local)?;

    if total_workers == 0 {
        return Err(ContextError::InvalidVariable {
            name: WORLD_SIZE_VAR,
            value: world,
        });
    }
    if index >= total_workers {
        return Err(ContextError::IndexOutOfRange {
            index,
            total_workers,
        });
    }

    Ok(DetectedIdentity {
        identity: WorkerIdentity {
            index,
            total_workers,
            device_index,
        },
        source: IdentitySource::Environment,
    })
}

fn parse_var(name: &'static str, value: &str) -> Result<usize, ContextError> {
    value
        .trim()
        .parse()
        .map_err(|_| ContextError::InvalidVariable {
            name,
            value: value.to_string(),
        })
}
