//! Collaborator traits for model loading and the two translation stages.
//!
//! The orchestrator never looks inside a model bundle. It loads one per
//! worker through a `ModelFactory` and lends it to every item.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::distributed::WorkerIdentity;
use crate::jobs::WorkItem;
use crate::logging::ItemLogger;

use super::errors::{StageError, StageResult};

/// Frame index chosen as a keyframe by stage one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyframeId(pub u32);

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two stages every item goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Keyframes,
    FullSequence,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Keyframes => "keyframe translation",
            Stage::FullSequence => "full-sequence translation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a stage may look at for one item.
pub struct ItemContext<'a> {
    pub item: &'a WorkItem,
    /// Derived per-item configuration.
    pub config: &'a PipelineConfig,
    pub identity: &'a WorkerIdentity,
    pub logger: &'a ItemLogger,
}

impl<'a> ItemContext<'a> {
    /// Output directory of the item.
    pub fn output_dir(&self) -> StageResult<&'a Path> {
        self.config
            .output_dir()
            .ok_or_else(|| StageError::invalid_input("No output path set for item"))
    }
}

/// Builds the model bundle once per worker.
///
/// Called after the device has been bound.
pub trait ModelFactory {
    type Bundle;

    fn load_models(
        &self,
        config: &PipelineConfig,
        identity: &WorkerIdentity,
    ) -> StageResult<Self::Bundle>;
}

/// The two translation stages.
pub trait TranslationStages {
    type Bundle;

    /// Stage one: translate selected keyframes and return their ids.
    fn translate_keyframes(
        &self,
        ctx: &ItemContext<'_>,
        models: &Self::Bundle,
    ) -> StageResult<Vec<KeyframeId>>;

    /// Stage two: propagate the keyframes across the whole sequence,
    /// writing results under the item's output directory.
    fn translate_full_sequence(
        &self,
        ctx: &ItemContext<'_>,
        keys: &[KeyframeId],
    ) -> StageResult<()>;
}
