//! Pipeline configuration.
//!
//! This module provides:
//! - A TOML-backed, strongly-typed `PipelineConfig` with pass-through keys
//! - `ConfigOverlay` for deriving per-item copies without touching the base
//! - `ConfigManager` for loading the base document once per process
//!
//! # Example
//!
//! ```no_run
//! use vtb_core::config::{ConfigManager, ConfigOverlay};
//!
//! let manager = ConfigManager::load("config/base.toml").unwrap();
//! let item = manager
//!     .config()
//!     .overlay(&ConfigOverlay::new().prompt_text("a red car in the snow"));
//! assert!(item.prompt_text.is_some());
//! ```

mod manager;
mod settings;

pub use manager::{describe, ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    with_trailing_separator, CommandSettings, ConfigOverlay, ControlType, PipelineConfig,
};
