//! Config manager for loading the base pipeline document.
//!
//! The document is read exactly once per process. Callers get a shared
//! reference to the base and derive per-item copies from it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::{ConfigOverlay, PipelineConfig};

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Owns the base pipeline configuration for a process.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Base configuration loaded from disk.
    config: PipelineConfig,
}

impl ConfigManager {
    /// Load the configuration document at `config_path`.
    pub fn load(config_path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_path = config_path.into();
        if !config_path.is_file() {
            return Err(ConfigError::NotFound(config_path));
        }

        let content = fs::read_to_string(&config_path)?;
        let config = Self::parse(&content)?;

        tracing::debug!(
            "Loaded config from {} ({} pass-through keys)",
            config_path.display(),
            config.extra.len()
        );

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Parse and validate configuration content.
    pub fn parse(content: &str) -> ConfigResult<PipelineConfig> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply process-wide overrides (CLI flags) before the base is shared.
    ///
    /// Consumes the manager so the base cannot change once items start.
    pub fn with_overrides(mut self, overlay: &ConfigOverlay) -> Self {
        self.config = self.config.overlay(overlay);
        self
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the base configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Take ownership of the base configuration.
    pub fn into_config(self) -> PipelineConfig {
        self.config
    }
}

/// Render a configuration as `key: value` lines sorted by key.
///
/// Nested tables are flattened into dotted keys.
pub fn describe(config: &PipelineConfig) -> ConfigResult<Vec<String>> {
    let value = toml::Value::try_from(config)?;
    let mut entries = Vec::new();
    flatten_into(&mut entries, String::new(), &value);
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(entries
        .into_iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect())
}

fn flatten_into(out: &mut Vec<(String, String)>, prefix: String, value: &toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(out, full, child);
            }
        }
        toml::Value::String(s) => out.push((prefix, s.clone())),
        other => out.push((prefix, other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlType;
    use tempfile::tempdir;

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let result = ConfigManager::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "seed = [unterminated").unwrap();

        let result = ConfigManager::load(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn rejects_unusable_frame_rates() {
        for bad in ["frame_rate = 0.0", "frame_rate = -24.0", "frame_rate = nan", "frame_rate = inf"] {
            let result = ConfigManager::parse(bad);
            assert!(
                matches!(result, Err(ConfigError::Invalid { key: "frame_rate", .. })),
                "{}",
                bad
            );
        }
        assert_eq!(ConfigManager::parse("frame_rate = 12.5").unwrap().frame_rate, 12.5);
    }

    #[test]
    fn load_reads_typed_and_extra_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.toml");
        fs::write(
            &path,
            "controlnet_type = \"canny\"\nframe_rate = 24.0\nuse_salinecy = true\n\n[commands]\nkeyframes = [\"python\", \"keys.py\"]\n",
        )
        .unwrap();

        let manager = ConfigManager::load(&path).unwrap();
        let config = manager.config();
        assert_eq!(config.controlnet_type, Some(ControlType::Canny));
        assert_eq!(config.frame_rate, 24.0);
        assert_eq!(config.commands.keyframes, vec!["python", "keys.py"]);
        assert!(config.extra.contains_key("use_salinecy"));
        assert_eq!(manager.path(), path.as_path());
    }

    #[test]
    fn overrides_apply_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.toml");
        fs::write(&path, "controlnet_type = \"canny\"\n").unwrap();

        let config = ConfigManager::load(&path)
            .unwrap()
            .with_overrides(&ConfigOverlay::new().controlnet_type(ControlType::Depth))
            .into_config();

        assert_eq!(config.controlnet_type, Some(ControlType::Depth));
    }

    #[test]
    fn describe_sorts_keys() {
        let config = ConfigManager::parse("seed = 3\nalpha = 1\n[commands]\nencoder = \"ffmpeg\"\n")
            .unwrap();
        let lines = describe(&config).unwrap();

        let keys: Vec<&str> = lines
            .iter()
            .map(|l| l.split(':').next().unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(lines.contains(&"seed: 3".to_string()));
        assert!(lines.contains(&"commands.encoder: ffmpeg".to_string()));
    }
}
