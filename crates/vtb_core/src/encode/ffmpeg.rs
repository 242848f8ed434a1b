//! FFmpeg frame-sequence encoding.
//!
//! Compiles numbered PNG frames (`0001.png`, `0002.png`, ...) into an H.264
//! video. Encoding is best-effort: failures come back as an
//! `EncodeStatus` instead of an error so callers can carry on.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Frame filename pattern expected in the frame directory.
pub const FRAME_PATTERN: &str = "%04d.png";

/// Outcome of an encode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeStatus {
    /// The video was written.
    Encoded,
    /// Frame directory missing or empty; the encoder was not run.
    EmptyInput,
    /// The encoder executable could not be found.
    ToolNotFound,
    /// The encoder ran and exited unsuccessfully.
    Failed { exit_code: Option<i32> },
}

impl EncodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EncodeStatus::Encoded)
    }

    /// Turn a failed status into an error for callers that require a video.
    pub fn into_result(self) -> Result<(), EncodeError> {
        match self {
            EncodeStatus::Encoded => Ok(()),
            EncodeStatus::EmptyInput => Err(EncodeError::EmptyInput),
            EncodeStatus::ToolNotFound => Err(EncodeError::ToolNotFound),
            EncodeStatus::Failed { exit_code } => Err(EncodeError::Failed { exit_code }),
        }
    }
}

/// Encoding failure, for strict callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Frame directory is empty or does not exist")]
    EmptyInput,

    #[error("Encoder tool not found")]
    ToolNotFound,

    #[error("Encoder exited with code {exit_code:?}")]
    Failed { exit_code: Option<i32> },
}

/// Synchronous wrapper around the external encoder.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    program: PathBuf,
    verbose: bool,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FrameEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            verbose: false,
        }
    }

    /// Show the encoder's own output instead of discarding it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Encode `frame_dir/%04d.png` at `frame_rate` into `output`.
    pub fn encode(&self, output: &Path, frame_dir: &Path, frame_rate: f64) -> EncodeStatus {
        if !has_frames(frame_dir) {
            tracing::warn!(
                "Frame directory {} is empty or does not exist",
                frame_dir.display()
            );
            return EncodeStatus::EmptyInput;
        }

        if self.verbose {
            tracing::info!(
                "Compiling video to {} from {} at {} fps",
                output.display(),
                frame_dir.display(),
                format_rate(frame_rate)
            );
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(output, frame_dir, frame_rate));
        if !self.verbose {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        tracing::debug!("Running encoder: {:?}", cmd);

        let status = match cmd.status() {
            Ok(status) => status,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::error!(
                    "Encoder tool not found: {}. Please install it or fix the path",
                    self.program.display()
                );
                return EncodeStatus::ToolNotFound;
            }
            Err(e) => {
                tracing::error!("Failed to run encoder {}: {}", self.program.display(), e);
                return EncodeStatus::Failed { exit_code: None };
            }
        };

        if !status.success() {
            tracing::error!(
                "Encoder exited with code {:?} while writing {}",
                status.code(),
                output.display()
            );
            return EncodeStatus::Failed {
                exit_code: status.code(),
            };
        }

        if self.verbose {
            tracing::info!("Saved video to {}", output.display());
        }
        EncodeStatus::Encoded
    }

    /// Encoder arguments for one run.
    pub fn args(output: &Path, frame_dir: &Path, frame_rate: f64) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-framerate".into(),
            format_rate(frame_rate).into(),
            "-i".into(),
            frame_dir.join(FRAME_PATTERN).into_os_string(),
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-crf".into(),
            "17".into(),
            output.as_os_str().to_os_string(),
        ]
    }
}

fn has_frames(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Whole rates print without a fraction.
fn format_rate(frame_rate: f64) -> String {
    if frame_rate.fract() == 0.0 {
        format!("{}", frame_rate as i64)
    } else {
        format!("{}", frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn frames_in(dir: &Path, count: usize) {
        for i in 1..=count {
            fs::write(dir.join(format!("{:04}.png", i)), b"png").unwrap();
        }
    }

    #[test]
    fn empty_directory_skips_encoder() {
        let dir = tempdir().unwrap();
        let frames = dir.path().join("blend");
        fs::create_dir(&frames).unwrap();

        // A program that cannot exist: reaching it would report ToolNotFound.
        let encoder = FrameEncoder::new(dir.path().join("no-such-encoder"));
        let status = encoder.encode(&dir.path().join("out.mp4"), &frames, 30.0);

        assert_eq!(status, EncodeStatus::EmptyInput);
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[test]
    fn missing_directory_is_empty_input() {
        let dir = tempdir().unwrap();
        let status = FrameEncoder::default().encode(
            &dir.path().join("out.mp4"),
            &dir.path().join("missing"),
            24.0,
        );
        assert_eq!(status, EncodeStatus::EmptyInput);
    }

    #[test]
    fn missing_tool_is_reported() {
        let dir = tempdir().unwrap();
        frames_in(dir.path(), 3);

        let encoder = FrameEncoder::new("vtb-encoder-that-does-not-exist");
        let status = encoder.encode(&dir.path().join("out.mp4"), dir.path(), 30.0);

        assert_eq!(status, EncodeStatus::ToolNotFound);
        assert_eq!(status.into_result(), Err(EncodeError::ToolNotFound));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_failure() {
        let dir = tempdir().unwrap();
        frames_in(dir.path(), 2);

        let status = FrameEncoder::new("false").encode(&dir.path().join("out.mp4"), dir.path(), 30.0);
        assert!(matches!(status, EncodeStatus::Failed { exit_code: Some(1) }));
        assert!(!status.is_success());
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_success() {
        let dir = tempdir().unwrap();
        frames_in(dir.path(), 1);

        let status = FrameEncoder::new("true").encode(&dir.path().join("out.mp4"), dir.path(), 30.0);
        assert_eq!(status, EncodeStatus::Encoded);
        assert_eq!(status.into_result(), Ok(()));
    }

    #[test]
    fn fixed_argument_set() {
        let args = FrameEncoder::args(Path::new("/out/blend.mp4"), Path::new("/out/blend"), 30.0);
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(
            args,
            vec![
                "-y",
                "-framerate",
                "30",
                "-i",
                "/out/blend/%04d.png",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                "17",
                "/out/blend.mp4",
            ]
        );
    }

    #[test]
    fn fractional_rate_kept() {
        assert_eq!(format_rate(29.97), "29.97");
        assert_eq!(format_rate(25.0), "25");
    }
}
