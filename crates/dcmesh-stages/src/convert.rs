//! Stage "convert": DICOM series to a compressed NIfTI volume.
use dcmesh_core::{Case, ExecutionContext, Result, Stage, StageOutcome};

use crate::process::{ProcessCommand, ProcessOutcome, ProcessRunner};

pub struct ConvertStage {
    program: String,
    runner: ProcessRunner,
}

impl ConvertStage {
    pub fn new(program: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// `<tool> -o <scratch volume dir> -z y <case input dir>`
    pub fn command(&self, case: &Case) -> ProcessCommand {
        ProcessCommand::new(&self.program)
            .arg("-o")
            .path_arg(case.volume_dir())
            .arg("-z")
            .arg("y")
            .path_arg(&case.input_dir)
    }
}

impl Default for ConvertStage {
    fn default() -> Self {
        Self::new("dcm2niix", ProcessRunner::default())
    }
}

impl Stage for ConvertStage {
    fn id(&self) -> &'static str {
        "convert.dcm2niix"
    }

    fn progress_mark(&self) -> f64 {
        1.0 / 3.0
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> Result<StageOutcome> {
        ctx.log(format!("converting DICOM: {}", case.input_dir.display()));
        match self.runner.run(&self.command(case), ctx)? {
            ProcessOutcome::Exited => Ok(StageOutcome::Completed),
            ProcessOutcome::Cancelled => Ok(StageOutcome::Cancelled),
        }
    }
}
