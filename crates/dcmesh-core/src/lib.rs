//! dcmesh Core: Stage Trait, Runner, Orchestrator and Data Model
//!
//! A batch of imaging studies goes through ordered stages, one case at a
//! time, on a single worker thread.
//!
//! ```text
//! Orchestrator ─► worker ─► case 1: convert → rename → segment → mesh
//!                           case 2: convert → rename → segment → mesh
//!                           ...
//!        ▲                       │
//!   cancel()                StageEvent stream (log / progress / finished)
//! ```

pub mod cancel;
pub mod context;
pub mod data_model;
pub mod error;
pub mod events;
pub mod layout;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod stage;

pub use cancel::CancellationToken;
pub use context::ExecutionContext;
pub use data_model::{
    Case, CaseReport, Device, PipelineRequest, RunState, RunStatus, RunSummary, StageEvent,
    StageOutcome, StageReport, MAX_CASES,
};
pub use error::{PipelineError, Result};
pub use events::{EventSink, EventStream};
pub use orchestrator::{Orchestrator, RunHandle};
pub use runner::PipelineRunner;
pub use stage::Stage;

/// dcmesh engine version
pub const DCMESH_VERSION: &str = env!("CARGO_PKG_VERSION");
