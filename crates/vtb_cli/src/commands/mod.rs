pub mod batch;
pub mod translate;

use vtb_core::logging::{LogConfig, LogLevel};

/// Item log settings for the chosen verbosity.
pub(crate) fn item_log_config(level: LogLevel) -> LogConfig {
    match level {
        LogLevel::Trace | LogLevel::Debug => LogConfig::debug(),
        _ => LogConfig::default(),
    }
}
