//! Error types for the batch orchestrator.
//!
//! Errors carry context that chains through layers:
//! Worker → Item → Stage → Operation → Detail

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::distributed::ContextError;
use crate::jobs::{DiscoveryError, PartitionError};

use super::stage::Stage;

/// Error from a translation stage or model factory.
#[derive(Error, Debug)]
pub enum StageError {
    /// Input validation failed.
    #[error("Input validation failed: {0}")]
    InvalidInput(String),

    /// An external command failed.
    #[error("{tool} failed with exit code {exit_code}: {message}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        message: String,
    },

    /// An external command could not be started because it does not exist.
    #[error("Tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// File I/O error.
    #[error("I/O error in {operation}: {source}")]
    IoError {
        operation: String,
        #[source]
        source: io::Error,
    },

    /// A required file was not found.
    #[error("Required file not found: {path}")]
    FileNotFound { path: String },

    /// Parsing error (e.g., keyframe list).
    #[error("Failed to parse {what}: {message}")]
    ParseError { what: String, message: String },

    /// The collaborator panicked. `trace` is the stack at the panic site.
    #[error("Stage panicked: {message}")]
    Panicked { message: String, trace: String },

    /// Generic stage error with message.
    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn command_failed(
        tool: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create an I/O error with context.
    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            source,
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn parse_error(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn panicked(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
            trace: trace.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Per-item failure. Recoverable: the batch moves on to the next item.
#[derive(Error, Debug)]
pub enum ItemError {
    /// The prompt file could not be read.
    #[error("Item '{item}': failed to read prompt {path}: {source}")]
    PromptUnreadable {
        item: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output directory or logger could not be set up.
    #[error("Item '{item}' setup failed: {message}")]
    SetupFailed { item: String, message: String },

    /// A stage failed. `trace` is the panic stack for panics, otherwise
    /// the stack where the stage error reached the item boundary.
    #[error("Item '{item}' failed at {stage}: {source}")]
    StageFailed {
        item: String,
        stage: Stage,
        #[source]
        source: StageError,
        trace: String,
    },
}

impl ItemError {
    pub fn setup_failed(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SetupFailed {
            item: item.into(),
            message: message.into(),
        }
    }

    pub fn stage_failed(item: impl Into<String>, stage: Stage, source: StageError) -> Self {
        let trace = match &source {
            StageError::Panicked { trace, .. } if !trace.is_empty() => trace.clone(),
            _ => Backtrace::force_capture().to_string(),
        };
        Self::StageFailed {
            item: item.into(),
            stage,
            source,
            trace,
        }
    }

    /// Stack trace captured for a stage failure.
    pub fn trace(&self) -> Option<&str> {
        match self {
            ItemError::StageFailed { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// Stage the failure happened in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ItemError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Fatal worker error. Aborts the worker before any item is processed.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to establish worker context: {0}")]
    Context(#[from] ContextError),

    #[error("Failed to discover work: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to partition work: {0}")]
    Partition(#[from] PartitionError),

    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load models: {0}")]
    ModelLoad(#[source] StageError),
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Result type for per-item processing.
pub type ItemResult<T> = Result<T, ItemError>;

/// Result type for a worker run.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Render an error and its causes, one entry per layer.
///
/// Causes already quoted by the layer above are left out.
pub fn error_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();

    while let Some(cause) = current {
        let text = cause.to_string();
        let already_shown = lines.last().map(|l| l.contains(&text)).unwrap_or(false);
        if !already_shown {
            lines.push(format!("caused by: {}", text));
        }
        current = cause.source();
    }

    lines
}
