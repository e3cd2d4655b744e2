//! Stage Trait: single contract for every step of a case
use crate::context::ExecutionContext;
use crate::data_model::{Case, StageOutcome};
use crate::error::Result;

/// One ordered step of a case's processing.
///
/// Stages run on the worker thread, one case at a time. A stage that
/// observes cancellation returns [`StageOutcome::Cancelled`] rather than an
/// error.
pub trait Stage: Send + Sync {
    /// Unique stage id (e.g. "convert.dcm2niix")
    fn id(&self) -> &'static str;

    /// Fraction of a case completed once this stage has run, in `[0, 1]`.
    fn progress_mark(&self) -> f64;

    /// Called once per run, before the first case.
    fn prepare(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> Result<StageOutcome>;
}
