//! Per-worker item loop.
//!
//! Items run strictly in list order. Each item is an isolation boundary:
//! stage errors and panics are caught, logged with their full cause chain,
//! a stack trace and the item's recent tool output, and the loop moves on.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;

use crate::config::{with_trailing_separator, ConfigOverlay, PipelineConfig};
use crate::distributed::WorkerIdentity;
use crate::jobs::WorkItem;
use crate::logging::{ItemLogger, LogConfig};

use super::errors::{error_chain, ItemError, ItemResult, StageError, StageResult};
use super::stage::{ItemContext, KeyframeId, Stage, TranslationStages};
use super::types::RunSummary;

/// Runs a worker's assigned items through both stages.
pub struct BatchRunner<'a, S: TranslationStages> {
    stages: &'a S,
    identity: WorkerIdentity,
    output_root: PathBuf,
    log_config: LogConfig,
}

impl<'a, S: TranslationStages> BatchRunner<'a, S> {
    pub fn new(stages: &'a S, identity: WorkerIdentity, output_root: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            identity,
            output_root: output_root.into(),
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Process every item. Never fails; failures end up in the summary.
    pub fn run(&self, base: &PipelineConfig, items: &[WorkItem], models: &S::Bundle) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.identity);

        for (position, item) in items.iter().enumerate() {
            tracing::info!(
                "{}: Processing {} ({}/{})",
                self.identity,
                item.name(),
                position + 1,
                items.len()
            );

            match self.process_item(base, item, models) {
                Ok(keys) => {
                    tracing::info!(
                        "{}: {} done ({} keyframes)",
                        self.identity,
                        item.name(),
                        keys.len()
                    );
                    summary.record_success(item.name());
                }
                Err(e) => {
                    for line in error_chain(&e) {
                        tracing::error!("{}: {}", self.identity, line);
                    }
                    if let Some(trace) = e.trace() {
                        tracing::error!("{}: stack trace:\n{}", self.identity, trace);
                    }
                    summary.record_failure(item.name(), e.to_string());
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            "{}: Finished processing all assigned videos",
            self.identity
        );
        summary
    }

    /// Run one item through setup, stage one and stage two.
    pub fn process_item(
        &self,
        base: &PipelineConfig,
        item: &WorkItem,
        models: &S::Bundle,
    ) -> ItemResult<Vec<KeyframeId>> {
        let prompt = read_prompt(item)?;
        let output_dir = item_output_dir(&self.output_root, item);

        let config = base.overlay(
            &ConfigOverlay::new()
                .input_path(item.media_path())
                .output_path(&output_dir)
                .prompt_text(prompt),
        );

        fs::create_dir_all(&output_dir).map_err(|e| {
            ItemError::setup_failed(
                item.name(),
                format!("cannot create {}: {}", output_dir.display(), e),
            )
        })?;

        let logger = ItemLogger::new(item.name(), &output_dir, self.log_config.clone())
            .map_err(|e| ItemError::setup_failed(item.name(), format!("cannot open log: {}", e)))?;

        logger.info(&format!("Input: {}", item.media_path().display()));
        logger.info(&format!("Output: {}", output_dir.display()));

        let ctx = ItemContext {
            item,
            config: &config,
            identity: &self.identity,
            logger: &logger,
        };

        logger.phase(Stage::Keyframes.name());
        let keys = contain(|| self.stages.translate_keyframes(&ctx, models))
            .map_err(|e| fail(&logger, item, Stage::Keyframes, e))?;
        logger.success(&format!("Translated {} keyframes", keys.len()));

        logger.phase(Stage::FullSequence.name());
        contain(|| self.stages.translate_full_sequence(&ctx, &keys))
            .map_err(|e| fail(&logger, item, Stage::FullSequence, e))?;
        logger.success("Item completed");

        Ok(keys)
    }
}

/// Output directory for an item: `<root>/<name>/`.
pub fn item_output_dir(output_root: &Path, item: &WorkItem) -> PathBuf {
    with_trailing_separator(output_root.join(item.name()))
}

fn read_prompt(item: &WorkItem) -> ItemResult<String> {
    fs::read_to_string(item.prompt_path())
        .map(|text| text.trim().to_string())
        .map_err(|source| ItemError::PromptUnreadable {
            item: item.name().to_string(),
            path: item.prompt_path().to_path_buf(),
            source,
        })
}

fn fail(logger: &ItemLogger, item: &WorkItem, stage: Stage, error: StageError) -> ItemError {
    logger.error(&format!("{} failed: {}", stage, error));
    let failure = ItemError::stage_failed(item.name(), stage, error);
    if let Some(trace) = failure.trace() {
        logger.error(&format!("Stack trace:\n{}", trace));
    }
    logger.show_tail("Recent tool output");
    logger.flush();
    tracing::error!("{}: full log at {}", item.name(), logger.log_path().display());
    failure
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Install a process-wide panic hook that records the stack of panics
/// raised inside `contain` and defers to the previous hook otherwise.
fn install_panic_capture() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = Backtrace::force_capture();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run a collaborator, turning a panic into a `StageError` that carries
/// the panic message and stack.
pub(crate) fn contain<T>(f: impl FnOnce() -> StageResult<T>) -> StageResult<T> {
    install_panic_capture();
    let outer = CAPTURING.with(|flag| flag.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|flag| flag.set(outer));

    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let trace = PANIC_TRACE
                .with(|slot| slot.borrow_mut().take())
                .map(|trace| trace.to_string())
                .unwrap_or_default();
            Err(StageError::panicked(panic_message(&*payload), trace))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
