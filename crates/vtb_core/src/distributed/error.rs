//! Errors raised while establishing or tearing down the worker context.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Fatal errors of the process context.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Environment variable {0} is required in distributed mode")]
    MissingVariable(&'static str),

    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidVariable { name: &'static str, value: String },

    #[error("Worker index {index} is out of range for {total_workers} workers")]
    IndexOutOfRange { index: usize, total_workers: usize },

    #[error("Unsupported rendezvous method: {0}")]
    UnsupportedMethod(String),

    #[error("Failed to form coordination group: {0}")]
    Rendezvous(#[from] RendezvousError),
}

/// Errors of the TCP rendezvous protocol.
#[derive(Error, Debug)]
pub enum RendezvousError {
    #[error("Rendezvous timed out after {waited:?} ({joined}/{expected} workers joined)")]
    Timeout {
        waited: Duration,
        joined: usize,
        expected: usize,
    },

    #[error("Rendezvous {operation} failed: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Rendezvous protocol error: {0}")]
    Protocol(String),
}

impl RendezvousError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
