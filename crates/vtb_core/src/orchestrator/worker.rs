//! Whole-worker lifecycle: context, discovery, models, items, teardown.

use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::distributed::{CoordinationBackend, DetectedIdentity, ProcessContext, WorkerIdentity};
use crate::jobs::{partition, resolve_pairs};
use crate::logging::LogConfig;

use super::errors::{WorkerError, WorkerResult};
use super::runner::{contain, BatchRunner};
use super::stage::{ModelFactory, TranslationStages};
use super::types::{PhaseTracker, RunSummary, WorkerPhase};

/// Inputs of a worker run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub media_dir: PathBuf,
    pub prompt_dir: PathBuf,
    pub output_root: PathBuf,
    pub log_config: LogConfig,
}

impl WorkerOptions {
    pub fn new(
        media_dir: impl Into<PathBuf>,
        prompt_dir: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            media_dir: media_dir.into(),
            prompt_dir: prompt_dir.into(),
            output_root: output_root.into(),
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }
}

/// What a worker did.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub identity: WorkerIdentity,
    /// Whether the worker joined a coordination group.
    pub distributed: bool,
    /// Items found across all workers.
    pub discovered: usize,
    /// Items owned by this worker.
    pub assigned: usize,
    pub models_loaded: bool,
    pub summary: RunSummary,
    pub phases: Vec<WorkerPhase>,
}

/// Run one worker end to end.
///
/// Fatal errors (context, discovery, model loading) abort before any item
/// runs. The coordination group is left on every path, including errors
/// and panics, because the context releases it on drop.
pub fn run_worker<F, S>(
    backend: &mut dyn CoordinationBackend,
    detected: DetectedIdentity,
    base: &PipelineConfig,
    factory: &F,
    stages: &S,
    options: &WorkerOptions,
) -> WorkerResult<WorkerReport>
where
    F: ModelFactory,
    S: TranslationStages<Bundle = F::Bundle>,
{
    let span = tracing::info_span!(
        "worker",
        rank = detected.identity.index,
        world = detected.identity.total_workers,
        device = detected.identity.device_index
    );
    let _entered = span.enter();

    let mut phases = PhaseTracker::default();

    let mut context = ProcessContext::establish(backend, detected)?;
    phases.advance(WorkerPhase::ContextEstablished);
    let identity = *context.identity();

    if identity.is_leader() {
        tracing::info!(
            "Starting batch translation {} with {} worker(s)",
            crate::version(),
            identity.total_workers
        );
    }

    let items = resolve_pairs(&options.media_dir, &options.prompt_dir)?;
    let mine = partition(&items, identity.total_workers, identity.index)?;

    let mut report = WorkerReport {
        identity,
        distributed: context.is_distributed(),
        discovered: items.len(),
        assigned: mine.len(),
        models_loaded: false,
        summary: RunSummary::new(identity),
        phases: Vec::new(),
    };

    if mine.is_empty() {
        tracing::info!("{}: No items assigned", identity);
        phases.advance(WorkerPhase::Drained);
    } else {
        tracing::info!("{} has been assigned {} videos", identity, mine.len());

        tracing::info!("{}: Loading models...", identity);
        let models = contain(|| factory.load_models(base, &identity)).map_err(WorkerError::ModelLoad)?;
        report.models_loaded = true;
        phases.advance(WorkerPhase::ModelsLoaded);
        tracing::info!("{}: Models loaded.", identity);

        phases.advance(WorkerPhase::Running);
        let runner = BatchRunner::new(stages, identity, &options.output_root)
            .with_log_config(options.log_config.clone());
        report.summary = runner.run(base, &mine, &models);
        phases.advance(WorkerPhase::Drained);
    }

    context.teardown()?;
    phases.advance(WorkerPhase::TornDown);

    report.phases = phases.history().to_vec();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{ContextError, GroupHandle, IdentitySource};
    use crate::orchestrator::{ItemContext, KeyframeId, StageError, StageResult};
    use std::cell::Cell;
    use std::fs;
    use tempfile::tempdir;

    struct NoBackend;

    impl CoordinationBackend for NoBackend {
        fn bind_device(&mut self, _device_index: usize) -> Result<(), ContextError> {
            Ok(())
        }

        fn join_group(
            &mut self,
            _identity: &WorkerIdentity,
            _backend_name: &str,
            method: &str,
        ) -> Result<GroupHandle, ContextError> {
            Err(ContextError::UnsupportedMethod(method.to_string()))
        }
    }

    struct Factory {
        loads: Cell<usize>,
        fail: bool,
    }

    impl ModelFactory for Factory {
        type Bundle = usize;

        fn load_models(
            &self,
            _config: &PipelineConfig,
            identity: &WorkerIdentity,
        ) -> StageResult<usize> {
            self.loads.set(self.loads.get() + 1);
            if self.fail {
                return Err(StageError::file_not_found("/models/missing.ckpt"));
            }
            Ok(identity.device_index)
        }
    }

    struct Stages;

    impl TranslationStages for Stages {
        type Bundle = usize;

        fn translate_keyframes(
            &self,
            _ctx: &ItemContext<'_>,
            _models: &usize,
        ) -> StageResult<Vec<KeyframeId>> {
            Ok(vec![KeyframeId(0)])
        }

        fn translate_full_sequence(
            &self,
            _ctx: &ItemContext<'_>,
            _keys: &[KeyframeId],
        ) -> StageResult<()> {
            Ok(())
        }
    }

    fn single() -> DetectedIdentity {
        DetectedIdentity {
            identity: WorkerIdentity::single(0),
            source: IdentitySource::Fallback,
        }
    }

    fn factory(fail: bool) -> Factory {
        Factory {
            loads: Cell::new(0),
            fail,
        }
    }

    #[test]
    fn empty_batch_skips_model_loading() {
        let videos = tempdir().unwrap();
        let prompts = tempdir().unwrap();
        let out = tempdir().unwrap();
        let f = factory(false);

        let report = run_worker(
            &mut NoBackend,
            single(),
            &PipelineConfig::default(),
            &f,
            &Stages,
            &WorkerOptions::new(videos.path(), prompts.path(), out.path()),
        )
        .unwrap();

        assert_eq!(report.assigned, 0);
        assert!(!report.distributed);
        assert!(!report.models_loaded);
        assert_eq!(f.loads.get(), 0);
        assert_eq!(
            report.phases,
            vec![
                WorkerPhase::Uninitialized,
                WorkerPhase::ContextEstablished,
                WorkerPhase::Drained,
                WorkerPhase::TornDown
            ]
        );
    }

    #[test]
    fn loads_models_once_for_all_items() {
        let videos = tempdir().unwrap();
        let prompts = tempdir().unwrap();
        let out = tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(videos.path().join(format!("{}.mp4", name)), "v").unwrap();
            fs::write(prompts.path().join(format!("{}.txt", name)), "p").unwrap();
        }
        let f = factory(false);

        let report = run_worker(
            &mut NoBackend,
            single(),
            &PipelineConfig::default(),
            &f,
            &Stages,
            &WorkerOptions::new(videos.path(), prompts.path(), out.path()),
        )
        .unwrap();

        assert_eq!(f.loads.get(), 1);
        assert_eq!(report.summary.succeeded, vec!["a", "b", "c"]);
        assert_eq!(report.phases.last(), Some(&WorkerPhase::TornDown));
    }

    #[test]
    fn model_load_failure_is_fatal() {
        let videos = tempdir().unwrap();
        let prompts = tempdir().unwrap();
        let out = tempdir().unwrap();
        fs::write(videos.path().join("a.mp4"), "v").unwrap();
        fs::write(prompts.path().join("a.txt"), "p").unwrap();

        let err = run_worker(
            &mut NoBackend,
            single(),
            &PipelineConfig::default(),
            &factory(true),
            &Stages,
            &WorkerOptions::new(videos.path(), prompts.path(), out.path()),
        )
        .unwrap_err();

        assert!(matches!(err, WorkerError::ModelLoad(_)));
        assert!(!out.path().join("a").exists());
    }

    #[test]
    fn missing_input_directory_is_fatal() {
        let out = tempdir().unwrap();
        let err = run_worker(
            &mut NoBackend,
            single(),
            &PipelineConfig::default(),
            &factory(false),
            &Stages,
            &WorkerOptions::new(out.path().join("v"), out.path().join("p"), out.path()),
        )
        .unwrap_err();

        assert!(matches!(err, WorkerError::Discovery(_)));
    }

    #[test]
    fn group_failure_is_fatal() {
        let out = tempdir().unwrap();
        let detected = DetectedIdentity {
            identity: WorkerIdentity {
                index: 0,
                total_workers: 2,
                device_index: 0,
            },
            source: IdentitySource::Environment,
        };

        let err = run_worker(
            &mut NoBackend,
            detected,
            &PipelineConfig::default(),
            &factory(false),
            &Stages,
            &WorkerOptions::new(out.path(), out.path(), out.path()),
        )
        .unwrap_err();

        assert!(matches!(err, WorkerError::Context(_)));
    }
}
