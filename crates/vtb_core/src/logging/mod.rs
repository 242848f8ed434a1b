//! Logging infrastructure for Video Translate Batch.
//!
//! This module provides:
//! - Global `tracing` setup with an optional per-worker log file
//! - Per-item loggers writing next to each item's outputs
//! - Tail buffer for external tool output on failure
//!
//! # Example
//!
//! ```no_run
//! use vtb_core::logging::{init_tracing, ItemLogger, LogConfig, LogLevel};
//!
//! let _guard = init_tracing(LogLevel::Info, None, "worker-0").unwrap();
//!
//! let logger = ItemLogger::new("car-turn", "/out/car-turn", LogConfig::default()).unwrap();
//! logger.phase("Keyframes");
//! logger.command("python keys.py --config item_config.json");
//! logger.success("Item completed");
//! ```

mod item_logger;
mod types;

pub use item_logger::ItemLogger;
pub use types::{LogConfig, LogLevel, MessagePrefix};

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize global tracing for a worker process.
///
/// This sets up a subscriber that:
/// - Respects RUST_LOG environment variable
/// - Falls back to the provided default level
/// - Outputs to stderr
/// - Optionally also writes `<log_dir>/<file_tag>.log` through a
///   non-blocking appender
///
/// The returned guard must be kept alive for the file to be flushed.
pub fn init_tracing(
    default_level: LogLevel,
    log_dir: Option<&Path>,
    file_tag: &str,
) -> std::io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, format!("{}.log", file_tag));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .with(filter)
        .try_init();

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }

    Ok(guard)
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
