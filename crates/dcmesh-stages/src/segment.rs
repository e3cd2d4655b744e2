//! Stage "segment": runs the AI segmentation tool on the canonical volume.
use dcmesh_core::{Case, ExecutionContext, Result, Stage, StageEvent, StageOutcome};
use tracing::info;

use crate::config::{ModelPaths, SegmentationConfig};
use crate::process::{ProcessCommand, ProcessOutcome, ProcessRunner};

pub struct SegmentStage {
    config: SegmentationConfig,
    models: ModelPaths,
    runner: ProcessRunner,
}

impl SegmentStage {
    pub fn new(config: SegmentationConfig, runner: ProcessRunner) -> Self {
        let models = config.model_paths();
        Self {
            config,
            models,
            runner,
        }
    }

    pub fn model_paths(&self) -> &ModelPaths {
        &self.models
    }

    /// `<tool> -i <in> -o <out> -d <dataset> -c <configuration> -f <fold>
    /// -device <device>`, model directories in the child's environment.
    pub fn command(&self, case: &Case, ctx: &ExecutionContext) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(&self.config.program)
            .arg("-i")
            .path_arg(case.volume_dir())
            .arg("-o")
            .path_arg(case.segmentation_dir())
            .arg("-d")
            .arg(&self.config.dataset)
            .arg("-c")
            .arg(&self.config.configuration)
            .arg("-f")
            .arg(&self.config.fold)
            .arg("-device")
            .arg(ctx.device.as_arg());
        for (key, path) in self.models.env_vars() {
            cmd = cmd.env(key, path.as_os_str());
        }
        cmd
    }
}

impl Default for SegmentStage {
    fn default() -> Self {
        Self::new(SegmentationConfig::default(), ProcessRunner::default())
    }
}

impl Stage for SegmentStage {
    fn id(&self) -> &'static str {
        "segment.nnunet"
    }

    fn progress_mark(&self) -> f64 {
        2.0 / 3.0
    }

    fn prepare(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.models.ensure_dirs()?;
        info!(
            raw = %self.models.raw.display(),
            preprocessed = %self.models.preprocessed.display(),
            results = %self.models.results.display(),
            "model directories ready"
        );
        Ok(())
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> Result<StageOutcome> {
        ctx.log(format!("segmenting on {}", ctx.device));
        let command = self.command(case, ctx);

        ctx.events().emit(StageEvent::SegmentationStarted);
        let result = self.runner.run(&command, ctx);
        ctx.events().emit(StageEvent::SegmentationFinished);

        match result? {
            ProcessOutcome::Exited => Ok(StageOutcome::Completed),
            ProcessOutcome::Cancelled => Ok(StageOutcome::Cancelled),
        }
    }
}
