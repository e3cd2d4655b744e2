//! Pipeline Runner: drives every case of a run through the ordered stages
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::data_model::{
    Case, CaseReport, PipelineRequest, RunStatus, RunSummary, StageOutcome, StageReport,
};
use crate::error::Result;
use crate::progress::ProgressTracker;
use crate::stage::Stage;

pub struct PipelineRunner {
    stages: Vec<Box<dyn Stage>>,
    pipeline_id: String,
    scratch_root: Option<PathBuf>,
}

impl PipelineRunner {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let pipeline_id = stages
            .iter()
            .map(|s| s.id().split('.').next().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join("→");

        Self {
            stages,
            pipeline_id,
            scratch_root: None,
        }
    }

    /// Parent directory for case workspaces (system temp dir otherwise).
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Runs the whole batch on the calling thread.
    ///
    /// Never emits `RunFinished`; the caller does that once the run state
    /// has been updated.
    pub fn run(&self, request: &PipelineRequest, ctx: &ExecutionContext) -> RunSummary {
        info!(
            run_id = %ctx.run_id,
            pipeline = %self.pipeline_id,
            cases = request.input_dirs.len(),
            device = %ctx.device,
            "run started"
        );

        let mut cases = Vec::new();
        let (status, message) = match self.run_cases(request, ctx, &mut cases) {
            Ok(StageOutcome::Completed) => {
                (RunStatus::Success, "all cases processed successfully".to_string())
            }
            Ok(StageOutcome::Cancelled) => (RunStatus::Cancelled, "run cancelled by user".to_string()),
            Err(err) if ctx.is_cancelled() => {
                // a stage torn down by cancellation may surface as an error
                warn!(run_id = %ctx.run_id, error = %err, "error after cancellation");
                (RunStatus::Cancelled, "run cancelled by user".to_string())
            }
            Err(err) => {
                let message = format!("error: {err}");
                warn!(run_id = %ctx.run_id, error = %err, "run failed");
                ctx.log(message.clone());
                (RunStatus::Error, message)
            }
        };

        if status == RunStatus::Cancelled {
            ctx.log(format!("--- {message} ---"));
        }
        info!(run_id = %ctx.run_id, status = %status, "run finished");

        RunSummary {
            run_id: ctx.run_id,
            status,
            message,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            cases,
        }
    }

    fn run_cases(
        &self,
        request: &PipelineRequest,
        ctx: &ExecutionContext,
        reports: &mut Vec<CaseReport>,
    ) -> Result<StageOutcome> {
        for stage in &self.stages {
            if ctx.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }
            stage.prepare(ctx)?;
        }

        let total = request.input_dirs.len();
        let mut progress = ProgressTracker::new(total);

        for (index, input_dir) in request.input_dirs.iter().enumerate() {
            if ctx.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }

            let case = Case::open(
                index,
                input_dir,
                &request.output_root,
                self.scratch_root.as_deref(),
            )?;
            info!(run_id = %ctx.run_id, case = %case.name, index, "case started");
            ctx.log(format!("--- case {}/{}: {} ---", index + 1, total, case.name));

            let mut report = CaseReport {
                index,
                name: case.name.clone(),
                output_dir: case.output_dir.clone(),
                stages: Vec::new(),
            };
            let outcome = self.run_case(&case, ctx, &mut progress, &mut report);
            reports.push(report);

            let workspace = case.workspace.root().to_path_buf();
            drop(case);
            debug!(workspace = %workspace.display(), "case workspace removed");

            if outcome? == StageOutcome::Cancelled {
                return Ok(StageOutcome::Cancelled);
            }
        }

        if let Some(percent) = progress.complete() {
            ctx.events().progress(percent);
        }
        Ok(StageOutcome::Completed)
    }

    fn run_case(
        &self,
        case: &Case,
        ctx: &ExecutionContext,
        progress: &mut ProgressTracker,
        report: &mut CaseReport,
    ) -> Result<StageOutcome> {
        for stage in &self.stages {
            if ctx.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }

            let start = Instant::now();
            debug!(case = %case.name, stage = stage.id(), "stage started");
            let outcome = stage.run(case, ctx)?;
            let latency_ms = start.elapsed().as_millis() as u64;

            report.stages.push(StageReport {
                id: stage.id().to_string(),
                latency_ms,
                outcome,
            });

            if outcome == StageOutcome::Cancelled {
                return Ok(StageOutcome::Cancelled);
            }
            if let Some(percent) = progress.advance(case.index, stage.progress_mark()) {
                ctx.events().progress(percent);
            }
        }
        Ok(StageOutcome::Completed)
    }
}
