//! Multi-worker batch translation of a folder of videos.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use vtb_core::bridge::CommandPipeline;
use vtb_core::config::{ConfigManager, ConfigOverlay, ControlType};
use vtb_core::distributed::{detect_identity, TcpRendezvous};
use vtb_core::logging::{init_tracing, LogLevel};
use vtb_core::orchestrator::{run_worker, WorkerOptions};

use super::item_log_config;

#[derive(Args)]
pub struct BatchCommand {
    /// Folder containing input videos (mp4, avi, mov, mkv)
    #[arg(long)]
    video_folder: PathBuf,

    /// Folder containing one <video name>.txt prompt per video
    #[arg(long)]
    prompt_folder: PathBuf,

    /// Base pipeline configuration
    #[arg(long)]
    base_config: PathBuf,

    /// Root folder for outputs; each video gets <root>/<name>/
    #[arg(long)]
    output_folder: PathBuf,

    /// ControlNet type: hed, canny or depth
    #[arg(long, default_value = "hed")]
    control_type: ControlType,

    /// GPU index when not started by a distributed launcher
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Write a worker-<rank>.log file per worker into this folder
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl BatchCommand {
    pub fn execute(self, level: LogLevel) -> Result<()> {
        let detected = detect_identity(self.device)?;
        let _guard = init_tracing(level, self.log_dir.as_deref(), &detected.identity.file_tag())
            .context("Failed to set up logging")?;

        let manager = ConfigManager::load(&self.base_config)
            .with_context(|| format!("Failed to load {}", self.base_config.display()))?
            .with_overrides(&ConfigOverlay::new().controlnet_type(self.control_type));
        tracing::info!("Base configuration: {}", manager.path().display());

        let mut backend = TcpRendezvous::from_env()?;
        let pipeline = CommandPipeline::new();
        let options = WorkerOptions::new(&self.video_folder, &self.prompt_folder, &self.output_folder)
            .with_log_config(item_log_config(level));

        let report = run_worker(
            &mut backend,
            detected,
            manager.config(),
            &pipeline,
            &pipeline,
            &options,
        )?;

        report.summary.log();
        if !report.summary.all_succeeded() {
            tracing::warn!(
                "{} item(s) failed; per-item logs are under {}",
                report.summary.failed.len(),
                self.output_folder.display()
            );
        }
        Ok(())
    }
}
