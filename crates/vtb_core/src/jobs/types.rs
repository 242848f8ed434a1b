//! Work item types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One unit of batch work: a video and its prompt file.
///
/// Immutable once created by discovery. The item's identity is the
/// video's file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    media_path: PathBuf,
    prompt_path: PathBuf,
    name: String,
}

impl WorkItem {
    /// Create a work item. The name is derived from the media file stem.
    pub fn new(media_path: impl Into<PathBuf>, prompt_path: impl Into<PathBuf>) -> Self {
        let media_path = media_path.into();
        let name = base_name(&media_path);
        Self {
            media_path,
            prompt_path: prompt_path.into(),
            name,
        }
    }

    /// Path of the source video.
    pub fn media_path(&self) -> &Path {
        &self.media_path
    }

    /// Path of the companion prompt file.
    pub fn prompt_path(&self) -> &Path {
        &self.prompt_path
    }

    /// Extension-stripped base name of the video.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Derive an item name from a media path.
pub(crate) fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string())
}
