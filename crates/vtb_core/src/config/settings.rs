//! Typed pipeline configuration and per-item overlays.
//!
//! The base document is loaded once and never mutated afterwards. Every
//! work item gets its own copy produced by [`PipelineConfig::overlay`].

use std::ffi::OsString;
use std::fmt;
use std::path::{PathBuf, MAIN_SEPARATOR_STR};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::manager::ConfigError;

/// ControlNet conditioning used by the keyframe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlType {
    /// Holistically-nested edge detection.
    #[default]
    Hed,
    /// Canny edges.
    Canny,
    /// Monocular depth.
    Depth,
}

impl ControlType {
    /// All supported control types, in CLI order.
    pub const ALL: [ControlType; 3] = [ControlType::Hed, ControlType::Canny, ControlType::Depth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hed => "hed",
            Self::Canny => "canny",
            Self::Depth => "depth",
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|control| control.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!(
                    "unknown control type '{}' (expected one of: {})",
                    wanted,
                    known.join(", ")
                )
            })
    }
}

/// Pipeline configuration document.
///
/// Known keys are strongly typed; everything else lands in `extra` and is
/// handed to the translation stages untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Source video for the current item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<PathBuf>,

    /// Output directory for the current item (always ends with a separator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Text prompt for the current item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,

    /// ControlNet conditioning type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlnet_type: Option<ControlType>,

    /// Random seed for the diffusion stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Run stage two (full-sequence propagation) after the keyframes.
    #[serde(default = "default_true")]
    pub run_full_sequence: bool,

    /// Frame rate used when encoding the final video.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,

    /// External commands backing the model factory and stages.
    #[serde(default)]
    pub commands: CommandSettings,

    /// Pipeline-specific keys passed through verbatim.
    #[serde(flatten)]
    pub extra: toml::Table,
}

fn default_true() -> bool {
    true
}

fn default_frame_rate() -> f64 {
    30.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: None,
            output_path: None,
            prompt_text: None,
            controlnet_type: None,
            seed: None,
            run_full_sequence: true,
            frame_rate: default_frame_rate(),
            commands: CommandSettings::default(),
            extra: toml::Table::new(),
        }
    }
}

impl PipelineConfig {
    /// Check values that would only fail later inside external tools.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "frame_rate",
                message: format!("{} is not a positive frame rate", self.frame_rate),
            });
        }
        Ok(())
    }

    /// Produce a new configuration with the overlay's fields written over
    /// a copy of this one.
    pub fn overlay(&self, overlay: &ConfigOverlay) -> PipelineConfig {
        let mut derived = self.clone();

        if let Some(ref path) = overlay.input_path {
            derived.input_path = Some(path.clone());
        }
        if let Some(ref path) = overlay.output_path {
            derived.output_path = Some(with_trailing_separator(path.clone()));
        }
        if let Some(ref prompt) = overlay.prompt_text {
            derived.prompt_text = Some(prompt.clone());
        }
        if let Some(control) = overlay.controlnet_type {
            derived.controlnet_type = Some(control);
        }
        if let Some(seed) = overlay.seed {
            derived.seed = Some(seed);
        }
        if let Some(run) = overlay.run_full_sequence {
            derived.run_full_sequence = run;
        }

        derived
    }

    /// Output directory, if one has been set.
    pub fn output_dir(&self) -> Option<&std::path::Path> {
        self.output_path.as_deref()
    }
}

/// Set of fields to write over a base configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverlay {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub prompt_text: Option<String>,
    pub controlnet_type: Option<ControlType>,
    pub seed: Option<u64>,
    pub run_full_sequence: Option<bool>,
}

impl ConfigOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn prompt_text(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_text = Some(prompt.into());
        self
    }

    pub fn controlnet_type(mut self, control: ControlType) -> Self {
        self.controlnet_type = Some(control);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn run_full_sequence(mut self, run: bool) -> Self {
        self.run_full_sequence = Some(run);
        self
    }
}

/// External commands used by the command-backed pipeline.
///
/// Each command is an argv list; the first element is the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Stage one command (keyframe translation).
    #[serde(default)]
    pub keyframes: Vec<String>,

    /// Stage two command (full-sequence propagation).
    #[serde(default)]
    pub sequence: Vec<String>,

    /// Optional command run once per worker after models are validated.
    #[serde(default)]
    pub warmup: Vec<String>,

    /// Model files that must exist before any item is processed.
    #[serde(default)]
    pub model_paths: Vec<PathBuf>,

    /// Video encoder executable.
    #[serde(default = "default_encoder")]
    pub encoder: String,

    /// Show encoder output instead of discarding it.
    #[serde(default)]
    pub verbose_encoder: bool,

    /// Fail stage two when the final video cannot be encoded.
    #[serde(default)]
    pub require_encode: bool,
}

fn default_encoder() -> String {
    "ffmpeg".to_string()
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            keyframes: Vec::new(),
            sequence: Vec::new(),
            warmup: Vec::new(),
            model_paths: Vec::new(),
            encoder: default_encoder(),
            verbose_encoder: false,
            require_encode: false,
        }
    }
}

/// Append a path separator unless the path already ends with one.
pub fn with_trailing_separator(path: PathBuf) -> PathBuf {
    let raw = path.as_os_str().to_string_lossy();
    if raw.ends_with(MAIN_SEPARATOR_STR) || raw.ends_with('/') {
        return path;
    }

    let mut s: OsString = path.into_os_string();
    s.push(MAIN_SEPARATOR_STR);
    PathBuf::from(s)
}
