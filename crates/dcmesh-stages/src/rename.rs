//! Stage "rename": gives the converted volume the name the segmentation
//! tool expects.
use dcmesh_core::layout;
use dcmesh_core::{Case, ExecutionContext, Result, Stage, StageOutcome};
use tracing::debug;

#[derive(Default)]
pub struct RenameStage;

impl Stage for RenameStage {
    fn id(&self) -> &'static str {
        "rename.canonical"
    }

    fn progress_mark(&self) -> f64 {
        1.33 / 3.0
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> Result<StageOutcome> {
        let (original, target) = layout::rename_converted_volume(case.volume_dir())?;
        debug!(case = %case.name, from = %original, to = %target.display(), "volume renamed");
        ctx.log(format!("renamed {original} -> {}", layout::CANONICAL_VOLUME));
        Ok(StageOutcome::Completed)
    }
}
