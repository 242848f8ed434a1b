//! Single-process translation of one video.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use clap::Args;
use vtb_core::bridge::{CommandPipeline, BLEND_VIDEO};
use vtb_core::config::{describe, ConfigManager, ConfigOverlay, ControlType};
use vtb_core::distributed::WorkerIdentity;
use vtb_core::jobs::WorkItem;
use vtb_core::logging::{init_tracing, ItemLogger, LogLevel};
use vtb_core::orchestrator::{ItemContext, ModelFactory, TranslationStages};

use super::item_log_config;

const RULE_WIDTH: usize = 60;

#[derive(Args)]
pub struct TranslateCommand {
    /// Input video
    #[arg(long)]
    video: PathBuf,

    /// Text prompt for the translation
    #[arg(long)]
    prompt: String,

    /// Output directory (created if missing)
    #[arg(long)]
    output: PathBuf,

    /// Base pipeline configuration
    #[arg(long, default_value = "config/base.toml")]
    config: PathBuf,

    /// ControlNet type: hed, canny or depth
    #[arg(long, default_value = "hed")]
    control_type: ControlType,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Only generate keyframes, skip full-sequence translation
    #[arg(long)]
    no_full_sequence: bool,

    /// GPU index to run on
    #[arg(long, default_value_t = 0)]
    device: usize,
}

impl TranslateCommand {
    pub fn execute(self, level: LogLevel) -> Result<()> {
        let _guard = init_tracing(level, None, "translate")?;

        if !self.video.exists() {
            bail!("Video file not found: {}", self.video.display());
        }
        if !self.config.exists() {
            bail!("Config file not found: {}", self.config.display());
        }

        let rule = "=".repeat(RULE_WIDTH);
        println!("{}", rule);
        println!("Loading configuration...");
        let base = ConfigManager::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?
            .into_config();

        let video = fs::canonicalize(&self.video)
            .with_context(|| format!("Failed to resolve {}", self.video.display()))?;
        let output = absolute(&self.output)?;

        let config = base.overlay(
            &ConfigOverlay::new()
                .input_path(&video)
                .prompt_text(self.prompt.as_str())
                .output_path(output)
                .controlnet_type(self.control_type)
                .seed(self.seed)
                .run_full_sequence(!self.no_full_sequence),
        );

        println!("{}", rule);
        println!("Configuration:");
        for line in describe(&config)? {
            println!("  {}", line);
        }
        println!("{}", rule);

        let output_dir = config
            .output_dir()
            .context("Output path missing from configuration")?
            .to_path_buf();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let identity = WorkerIdentity::single(self.device);
        let pipeline = CommandPipeline::new();
        let models = pipeline
            .load_models(&config, &identity)
            .context("Failed to load models")?;

        let item = WorkItem::new(&video, PathBuf::new());
        let logger = ItemLogger::new(item.name(), &output_dir, item_log_config(level))?;
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };

        println!("\n[Step 1/2] Running keyframe translation...");
        let keys = pipeline.translate_keyframes(&ctx, &models).map_err(|e| {
            logger.show_tail("Keyframe command output");
            e
        })?;
        let listed: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        println!("Generated {} keyframes: [{}]", keys.len(), listed.join(", "));

        if config.run_full_sequence {
            println!("\n[Step 2/2] Running full-sequence translation...");
            pipeline.translate_full_sequence(&ctx, &keys).map_err(|e| {
                logger.show_tail("Sequence command output");
                e
            })?;
        } else {
            println!("\n[Step 2/2] Skipped (--no-full-sequence)");
        }

        println!("\n{}", rule);
        println!("Done!");
        println!("  Output directory: {}", output_dir.display());
        println!("  Keyframes: {}keys{}", output_dir.display(), std::path::MAIN_SEPARATOR);
        if config.run_full_sequence {
            println!("  Final video: {}", output_dir.join(BLEND_VIDEO).display());
        } else {
            println!("  (Full-sequence translation skipped, keyframes only)");
        }
        println!("{}", rule);

        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
