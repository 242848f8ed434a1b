//! Per-item logger with file and tracing output.
//!
//! Each work item gets its own logger that:
//! - Writes to a dedicated log file next to the item's outputs
//! - Mirrors every message into the global `tracing` subscriber
//! - Keeps a tail buffer of external tool output for error diagnosis

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogConfig, LogLevel, MessagePrefix};

/// Per-item logger with dual output (file + tracing).
pub struct ItemLogger {
    /// Item name for identification.
    item_name: String,
    /// Path to log file.
    log_path: PathBuf,
    /// File writer (buffered).
    file_writer: Mutex<Option<BufWriter<File>>>,
    /// Logging configuration.
    config: LogConfig,
    /// Recent tool output lines.
    tail_buffer: Mutex<VecDeque<String>>,
}

impl ItemLogger {
    /// Create a new item logger writing `<log_dir>/<item_name>.log`.
    pub fn new(
        item_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
    ) -> std::io::Result<Self> {
        let item_name = item_name.into();
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", sanitize_filename(&item_name)));
        let file = File::create(&log_path)?;

        Ok(Self {
            item_name,
            log_path,
            file_writer: Mutex::new(Some(BufWriter::new(file))),
            tail_buffer: Mutex::new(VecDeque::with_capacity(config.error_tail)),
            config,
        })
    }

    /// Get the log file path.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }

        self.mirror(level, message);
        let formatted = self.format_message(message);
        self.write_line(&formatted);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        let msg = MessagePrefix::Warning.format(message);
        self.log(LogLevel::Warn, &msg);
    }

    pub fn error(&self, message: &str) {
        let msg = MessagePrefix::Error.format(message);
        self.log(LogLevel::Error, &msg);
    }

    /// Log a command being executed.
    pub fn command(&self, command: &str) {
        let msg = MessagePrefix::Command.format(command);
        self.log(LogLevel::Info, &msg);
    }

    /// Log a phase marker.
    pub fn phase(&self, phase_name: &str) {
        let msg = MessagePrefix::Phase.format(phase_name);
        self.log(LogLevel::Info, &msg);
    }

    pub fn success(&self, message: &str) {
        let msg = MessagePrefix::Success.format(message);
        self.log(LogLevel::Info, &msg);
    }

    /// Record an output line from an external tool.
    ///
    /// In compact mode lines only go to the tail buffer.
    pub fn output_line(&self, line: &str, is_stderr: bool) {
        {
            let mut buffer = self.tail_buffer.lock();
            if self.config.error_tail > 0 && buffer.len() >= self.config.error_tail {
                buffer.pop_front();
            }
            if self.config.error_tail > 0 {
                buffer.push_back(line.to_string());
            }
        }

        if self.config.compact {
            return;
        }

        let prefix = if is_stderr { "[stderr] " } else { "" };
        let msg = format!("{}{}", prefix, line);
        self.write_line(&self.format_message(&msg));
    }

    /// Dump the tail buffer (typically after an error).
    pub fn show_tail(&self, header: &str) {
        let lines = self.get_tail();
        if lines.is_empty() {
            return;
        }

        let header = format!("[{}/tail]", header);
        self.mirror(LogLevel::Error, &header);
        self.write_line(&self.format_message(&header));
        for line in &lines {
            self.mirror(LogLevel::Error, line);
            self.write_line(&self.format_message(line));
        }
    }

    /// Get the current tail buffer contents.
    pub fn get_tail(&self) -> Vec<String> {
        self.tail_buffer.lock().iter().cloned().collect()
    }

    pub fn flush(&self) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writer.flush();
        }
    }

    /// Close the logger and release the file.
    pub fn close(&self) {
        self.flush();
        *self.file_writer.lock() = None;
    }

    fn format_message(&self, message: &str) -> String {
        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            format!("[{}] {}", timestamp, message)
        } else {
            message.to_string()
        }
    }

    fn write_line(&self, formatted: &str) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writeln!(writer, "{}", formatted);
        }
    }

    fn mirror(&self, level: LogLevel, message: &str) {
        let item = self.item_name.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(item, "{}", message),
            LogLevel::Debug => tracing::debug!(item, "{}", message),
            LogLevel::Info => tracing::info!(item, "{}", message),
            LogLevel::Warn => tracing::warn!(item, "{}", message),
            LogLevel::Error => tracing::error!(item, "{}", message),
        }
    }
}

impl Drop for ItemLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sanitize a string to be safe for use as a filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_log_file() {
        let dir = tempdir().unwrap();
        let logger = ItemLogger::new("car-turn", dir.path(), LogConfig::default()).unwrap();

        assert!(logger.log_path().exists());
        assert!(logger.log_path().ends_with("car-turn.log"));
    }

    #[test]
    fn writes_to_file() {
        let dir = tempdir().unwrap();
        let logger = ItemLogger::new("car-turn", dir.path(), LogConfig::default()).unwrap();

        logger.phase("Keyframes");
        logger.info("Generated 4 keyframes");
        logger.flush();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("=== Keyframes ==="));
        assert!(content.contains("Generated 4 keyframes"));
    }

    #[test]
    fn level_filter_drops_debug() {
        let dir = tempdir().unwrap();
        let logger = ItemLogger::new("item", dir.path(), LogConfig::default()).unwrap();

        logger.debug("hidden detail");
        logger.flush();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(!content.contains("hidden detail"));
    }

    #[test]
    fn compact_mode_keeps_output_in_tail_only() {
        let dir = tempdir().unwrap();
        let logger = ItemLogger::new("item", dir.path(), LogConfig::default()).unwrap();

        logger.output_line("step 1/20", false);
        logger.flush();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(!content.contains("step 1/20"));
        assert_eq!(logger.get_tail(), vec!["step 1/20"]);

        logger.show_tail("keyframes");
        logger.flush();
        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("[keyframes/tail]"));
        assert!(content.contains("step 1/20"));
    }

    #[test]
    fn tail_buffer_maintains_limit() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            error_tail: 5,
            ..LogConfig::default()
        };
        let logger = ItemLogger::new("item", dir.path(), config).unwrap();

        for i in 0..10 {
            logger.output_line(&format!("Line {}", i), true);
        }

        let tail = logger.get_tail();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0], "Line 5");
        assert_eq!(tail[4], "Line 9");
    }

    #[test]
    fn sanitizes_filename() {
        assert_eq!(sanitize_filename("normal_name"), "normal_name");
        assert_eq!(sanitize_filename("has/slash"), "has_slash");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
    }
}
