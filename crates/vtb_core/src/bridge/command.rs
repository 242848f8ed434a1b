//! Command-backed model factory and translation stages.
//!
//! The heavy lifting (diffusion, propagation) lives in external programs
//! configured under `[commands]`. Each stage gets the derived item
//! configuration as `item_config.json` in the item's output directory and
//! runs with `CUDA_VISIBLE_DEVICES` pinned to the worker's device.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PipelineConfig;
use crate::distributed::{WorkerIdentity, DEVICE_VAR};
use crate::encode::FrameEncoder;
use crate::logging::ItemLogger;
use crate::orchestrator::{
    ItemContext, KeyframeId, ModelFactory, StageError, StageResult, TranslationStages,
};

/// Name of the derived configuration written for each item.
pub const ITEM_CONFIG_FILE: &str = "item_config.json";
/// Directory of blended frames produced by the sequence command.
pub const BLEND_DIR: &str = "blend";
/// Final video written inside the output directory.
pub const BLEND_VIDEO: &str = "blend.mp4";

/// Per-worker bundle for the command pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandModels {
    pub device_index: usize,
    pub model_paths: Vec<PathBuf>,
}

/// Pipeline driving external commands.
#[derive(Debug, Clone, Default)]
pub struct CommandPipeline;

impl CommandPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl ModelFactory for CommandPipeline {
    type Bundle = CommandModels;

    fn load_models(
        &self,
        config: &PipelineConfig,
        identity: &WorkerIdentity,
    ) -> StageResult<CommandModels> {
        let commands = &config.commands;

        for path in &commands.model_paths {
            if !path.exists() {
                return Err(StageError::file_not_found(path.display().to_string()));
            }
            tracing::debug!("Model present: {}", path.display());
        }

        if !commands.warmup.is_empty() {
            tracing::info!("Running warmup command");
            run_tool(&commands.warmup, &[], identity.device_index, None)?;
        }

        Ok(CommandModels {
            device_index: identity.device_index,
            model_paths: commands.model_paths.clone(),
        })
    }
}

impl TranslationStages for CommandPipeline {
    type Bundle = CommandModels;

    fn translate_keyframes(
        &self,
        ctx: &ItemContext<'_>,
        models: &CommandModels,
    ) -> StageResult<Vec<KeyframeId>> {
        let output_dir = ctx.output_dir()?;
        let config_file = write_item_config(ctx.config, output_dir)?;

        let stdout = run_tool(
            &ctx.config.commands.keyframes,
            &[OsString::from("--config"), config_file.into_os_string()],
            models.device_index,
            Some(ctx.logger),
        )?;

        let keys = parse_keyframes(&stdout)?;
        ctx.logger.info(&format!(
            "Keyframes: {}",
            keys.iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok(keys)
    }

    fn translate_full_sequence(
        &self,
        ctx: &ItemContext<'_>,
        keys: &[KeyframeId],
    ) -> StageResult<()> {
        if !ctx.config.run_full_sequence {
            ctx.logger
                .info("Full-sequence translation disabled, keeping keyframes only");
            return Ok(());
        }

        let output_dir = ctx.output_dir()?;
        let config_file = output_dir.join(ITEM_CONFIG_FILE);
        if !config_file.is_file() {
            write_item_config(ctx.config, output_dir)?;
        }

        run_tool(
            &ctx.config.commands.sequence,
            &[
                OsString::from("--config"),
                config_file.into_os_string(),
                OsString::from("--keys"),
                OsString::from(join_keys(keys)),
            ],
            ctx.identity.device_index,
            Some(ctx.logger),
        )?;

        let commands = &ctx.config.commands;
        let video = output_dir.join(BLEND_VIDEO);
        let status = FrameEncoder::new(&commands.encoder)
            .verbose(commands.verbose_encoder)
            .encode(&video, &output_dir.join(BLEND_DIR), ctx.config.frame_rate);

        if status.is_success() {
            ctx.logger.success(&format!("Wrote {}", video.display()));
            return Ok(());
        }

        ctx.logger
            .warn(&format!("Could not encode {}: {:?}", video.display(), status));
        if commands.require_encode {
            status.into_result().map_err(|e| {
                StageError::other(format!("encoding {}: {}", video.display(), e))
            })?;
        }
        Ok(())
    }
}

fn write_item_config(config: &PipelineConfig, output_dir: &Path) -> StageResult<PathBuf> {
    let path = output_dir.join(ITEM_CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| StageError::parse_error("item configuration", e.to_string()))?;
    fs::write(&path, json).map_err(|e| StageError::io_error("writing item configuration", e))?;
    Ok(path)
}

/// Run an argv command and return its stdout.
///
/// Output lines go to the item logger when one is given.
fn run_tool(
    argv: &[String],
    extra_args: &[OsString],
    device_index: usize,
    logger: Option<&ItemLogger>,
) -> StageResult<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| StageError::invalid_input("Command is not configured"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .args(extra_args)
        .env(DEVICE_VAR, device_index.to_string());

    let shown = format!(
        "{} {}",
        argv.join(" "),
        extra_args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    match logger {
        Some(logger) => logger.command(shown.trim_end()),
        None => tracing::debug!("$ {}", shown.trim_end()),
    }

    let output = cmd.output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            StageError::tool_not_found(program.clone())
        } else {
            StageError::io_error(format!("executing {}", program), e)
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if let Some(logger) = logger {
        for line in stdout.lines() {
            logger.output_line(line, false);
        }
        for line in stderr.lines() {
            logger.output_line(line, true);
        }
    }

    if let Some(logger) = logger {
        logger.debug(&format!("{} exited with {}", program, output.status));
    }

    if !output.status.success() {
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no error output")
            .to_string();
        return Err(StageError::command_failed(
            program.clone(),
            output.status.code().unwrap_or(-1),
            message,
        ));
    }

    Ok(stdout)
}

/// Parse keyframe ids from the last non-empty stdout line.
///
/// Accepts a JSON array (`[0, 8, 16]`) or integers separated by
/// whitespace or commas.
fn parse_keyframes(stdout: &str) -> StageResult<Vec<KeyframeId>> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| StageError::parse_error("keyframe list", "command printed nothing"))?;

    let keys: Vec<KeyframeId> = if line.starts_with('[') {
        serde_json::from_str(line)
            .map_err(|e| StageError::parse_error("keyframe list", e.to_string()))?
    } else {
        line.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>().map(KeyframeId).map_err(|_| {
                    StageError::parse_error("keyframe list", format!("'{}' is not a frame index", s))
                })
            })
            .collect::<StageResult<_>>()?
    };

    if keys.is_empty() {
        return Err(StageError::parse_error("keyframe list", "no keyframes selected"));
    }
    Ok(keys)
}

fn join_keys(keys: &[KeyframeId]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::WorkItem;
    use crate::logging::LogConfig;
    use tempfile::tempdir;

    #[test]
    fn parses_json_and_plain_lists() {
        assert_eq!(
            parse_keyframes("loading...\n[0, 8, 16]\n").unwrap(),
            vec![KeyframeId(0), KeyframeId(8), KeyframeId(16)]
        );
        assert_eq!(
            parse_keyframes("0 4,9\n\n").unwrap(),
            vec![KeyframeId(0), KeyframeId(4), KeyframeId(9)]
        );
        assert!(parse_keyframes("").is_err());
        assert!(parse_keyframes("[]").is_err());
        assert!(parse_keyframes("done: 3").is_err());
    }

    #[test]
    fn joins_keys_for_stage_two() {
        assert_eq!(join_keys(&[KeyframeId(1), KeyframeId(22)]), "1,22");
    }

    #[test]
    fn missing_model_file_fails_loading() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.commands.model_paths = vec![dir.path().join("sd.ckpt")];

        let err = CommandPipeline::new()
            .load_models(&config, &WorkerIdentity::single(0))
            .unwrap_err();
        assert!(matches!(err, StageError::FileNotFound { .. }));
    }

    #[test]
    fn loads_bundle_with_existing_models() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("sd.ckpt");
        fs::write(&model, "weights").unwrap();
        let mut config = PipelineConfig::default();
        config.commands.model_paths = vec![model.clone()];

        let models = CommandPipeline::new()
            .load_models(&config, &WorkerIdentity::single(3))
            .unwrap();
        assert_eq!(models.device_index, 3);
        assert_eq!(models.model_paths, vec![model]);
    }

    #[test]
    fn missing_program_is_tool_not_found() {
        let err = run_tool(&["vtb-no-such-program".to_string()], &[], 0, None).unwrap_err();
        assert!(matches!(err, StageError::ToolNotFound { .. }));

        let err = run_tool(&[], &[], 0, None).unwrap_err();
        assert!(matches!(err, StageError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[test]
    fn keyframe_stage_runs_configured_command() {
        let out = tempdir().unwrap();
        let output_dir = crate::config::with_trailing_separator(out.path().join("car"));
        fs::create_dir_all(&output_dir).unwrap();

        let mut config = PipelineConfig::default();
        config.output_path = Some(output_dir.clone());
        config.prompt_text = Some("a red car".to_string());
        config.commands.keyframes = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo \"device $CUDA_VISIBLE_DEVICES\"; echo '[0, 5]'".to_string(),
        ];

        let item = WorkItem::new("/videos/car.mp4", "/prompts/car.txt");
        let identity = WorkerIdentity::single(2);
        let logger = ItemLogger::new("car", &output_dir, LogConfig::default()).unwrap();
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };
        let models = CommandModels {
            device_index: 2,
            model_paths: Vec::new(),
        };

        let keys = CommandPipeline::new().translate_keyframes(&ctx, &models).unwrap();
        assert_eq!(keys, vec![KeyframeId(0), KeyframeId(5)]);

        let written = fs::read_to_string(output_dir.join(ITEM_CONFIG_FILE)).unwrap();
        assert!(written.contains("a red car"));
        assert!(logger.get_tail().iter().any(|l| l.contains("device 2")));
    }

    #[cfg(unix)]
    #[test]
    fn failing_sequence_command_reports_stderr() {
        let out = tempdir().unwrap();
        let output_dir = crate::config::with_trailing_separator(out.path().join("car"));
        fs::create_dir_all(&output_dir).unwrap();

        let mut config = PipelineConfig::default();
        config.output_path = Some(output_dir.clone());
        config.commands.sequence = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'ebsynth crashed' >&2; exit 3".to_string(),
        ];

        let item = WorkItem::new("/videos/car.mp4", "/prompts/car.txt");
        let identity = WorkerIdentity::single(0);
        let logger = ItemLogger::new("car", &output_dir, LogConfig::default()).unwrap();
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };

        let err = CommandPipeline::new()
            .translate_full_sequence(&ctx, &[KeyframeId(0)])
            .unwrap_err();
        match err {
            StageError::CommandFailed {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(message, "ebsynth crashed");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn sequence_without_frames_still_succeeds() {
        let out = tempdir().unwrap();
        let output_dir = crate::config::with_trailing_separator(out.path().join("car"));
        fs::create_dir_all(&output_dir).unwrap();

        let mut config = PipelineConfig::default();
        config.output_path = Some(output_dir.clone());
        config.commands.sequence = vec!["true".to_string()];
        config.commands.encoder = "vtb-no-such-encoder".to_string();

        let item = WorkItem::new("/videos/car.mp4", "/prompts/car.txt");
        let identity = WorkerIdentity::single(0);
        let logger = ItemLogger::new("car", &output_dir, LogConfig::default()).unwrap();
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };

        CommandPipeline::new()
            .translate_full_sequence(&ctx, &[KeyframeId(0)])
            .unwrap();
        assert!(!output_dir.join(BLEND_VIDEO).exists());
    }

    #[cfg(unix)]
    #[test]
    fn disabled_full_sequence_skips_stage_two() {
        let out = tempdir().unwrap();
        let output_dir = crate::config::with_trailing_separator(out.path().join("car"));
        fs::create_dir_all(&output_dir).unwrap();
        let marker = output_dir.join("sequence-ran");

        let mut config = PipelineConfig::default();
        config.output_path = Some(output_dir.clone());
        config.run_full_sequence = false;
        config.commands.sequence = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("touch '{}'", marker.display()),
        ];

        let item = WorkItem::new("/videos/car.mp4", "/prompts/car.txt");
        let identity = WorkerIdentity::single(0);
        let logger = ItemLogger::new("car", &output_dir, LogConfig::default()).unwrap();
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };

        CommandPipeline::new()
            .translate_full_sequence(&ctx, &[KeyframeId(0)])
            .unwrap();
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn required_encode_failure_fails_stage_two() {
        let out = tempdir().unwrap();
        let output_dir = crate::config::with_trailing_separator(out.path().join("car"));
        fs::create_dir_all(&output_dir).unwrap();

        let mut config = PipelineConfig::default();
        config.output_path = Some(output_dir.clone());
        config.commands.sequence = vec!["true".to_string()];
        config.commands.require_encode = true;

        let item = WorkItem::new("/videos/car.mp4", "/prompts/car.txt");
        let identity = WorkerIdentity::single(0);
        let logger = ItemLogger::new("car", &output_dir, LogConfig::default()).unwrap();
        let ctx = ItemContext {
            item: &item,
            config: &config,
            identity: &identity,
            logger: &logger,
        };

        let err = CommandPipeline::new()
            .translate_full_sequence(&ctx, &[KeyframeId(0)])
            .unwrap_err();
        assert!(err.to_string().contains("empty or does not exist"));
    }
}
