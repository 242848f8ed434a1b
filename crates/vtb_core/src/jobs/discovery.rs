//! Work discovery: pairing videos with prompt files.
//!
//! Every worker process runs discovery on its own and must arrive at the
//! exact same ordered list, so the result is sorted by full path and never
//! depends on directory enumeration order.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::types::{base_name, WorkItem};

/// Extensions recognised as input videos (case-sensitive).
pub const MEDIA_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Extension of companion prompt files.
pub const PROMPT_EXTENSION: &str = "txt";

/// Errors raised while scanning input directories.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("{role} directory not found: {path}")]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Full result of pairing, including what was left out.
#[derive(Debug, Clone, Default)]
pub struct PairingReport {
    /// Matched items in deterministic order.
    pub items: Vec<WorkItem>,
    /// Videos with no companion prompt file.
    pub unmatched: Vec<PathBuf>,
    /// Videos dropped because an earlier video had the same base name.
    pub duplicates: Vec<PathBuf>,
}

/// Resolve the ordered list of work items.
///
/// Videos without a prompt file are skipped with a warning.
pub fn resolve_pairs(media_dir: &Path, prompt_dir: &Path) -> Result<Vec<WorkItem>, DiscoveryError> {
    Ok(resolve_pairs_detailed(media_dir, prompt_dir)?.items)
}

/// Resolve work items and report skipped videos.
pub fn resolve_pairs_detailed(
    media_dir: &Path,
    prompt_dir: &Path,
) -> Result<PairingReport, DiscoveryError> {
    if !media_dir.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            role: "Video",
            path: media_dir.to_path_buf(),
        });
    }
    if !prompt_dir.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            role: "Prompt",
            path: prompt_dir.to_path_buf(),
        });
    }

    let videos = list_media_files(media_dir)?;
    let mut report = PairingReport::default();
    let mut seen_names = HashSet::new();

    for video in videos {
        let name = base_name(&video);
        let prompt = prompt_dir.join(format!("{}.{}", name, PROMPT_EXTENSION));

        if !prompt.is_file() {
            tracing::warn!(
                "No matching prompt found for {}, skipping",
                video.display()
            );
            report.unmatched.push(video);
            continue;
        }

        if !seen_names.insert(name.clone()) {
            tracing::warn!(
                "Another video named '{}' was already paired, skipping {}",
                name,
                video.display()
            );
            report.duplicates.push(video);
            continue;
        }

        report.items.push(WorkItem::new(video, prompt));
    }

    tracing::debug!(
        "Paired {} videos ({} without prompt, {} duplicate names)",
        report.items.len(),
        report.unmatched.len(),
        report.duplicates.len()
    );

    Ok(report)
}

/// List recognised video files directly under `dir`, sorted by full path.
fn list_media_files(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let read_err = |source| DiscoveryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut videos = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();

        if !path.is_file() || is_hidden(&path) || !has_media_extension(&path) {
            continue;
        }
        videos.push(path);
    }

    videos.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    Ok(videos)
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
