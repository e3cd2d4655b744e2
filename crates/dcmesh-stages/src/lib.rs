//! dcmesh Stages: the concrete steps of a case.
//!
//! # Pipeline Flow
//!
//! ```text
//! input dir → convert → rename → segment → mesh → <output>/<case>_stl/*.stl
//!               ↓         ↓         ↓        ↓
//!          *.nii.gz  case_0000  case.nii.gz  Upper_Skull.stl, Mandible.stl, ...
//! ```
//!
//! `convert` and `segment` wrap external tools through [`ProcessRunner`];
//! `rename` and `mesh` run in-process.

pub mod config;
mod convert;
mod mesh;
pub mod process;
mod rename;
mod segment;

pub use config::{ConfigError, ModelPaths, PipelineConfig};
pub use convert::ConvertStage;
pub use mesh::MeshStage;
pub use process::{ProcessCommand, ProcessOutcome, ProcessRunner};
pub use rename::RenameStage;
pub use segment::SegmentStage;

use dcmesh_core::{Orchestrator, PipelineRunner, Stage};

// ============================================================================
// CONVENIENCE BUILDERS
// ============================================================================

/// The four stages in order `convert → rename → segment → mesh`.
pub fn default_stages(config: &PipelineConfig) -> Vec<Box<dyn Stage>> {
    let runner = ProcessRunner::new(config.process.terminate_grace());
    vec![
        Box::new(ConvertStage::new(&config.converter.program, runner.clone())),
        Box::new(RenameStage),
        Box::new(SegmentStage::new(config.segmentation.clone(), runner)),
        Box::new(MeshStage::new(&config.mesh)),
    ]
}

/// Runner over [`default_stages`] with the configured scratch root.
pub fn pipeline_runner(config: &PipelineConfig) -> PipelineRunner {
    let runner = PipelineRunner::new(default_stages(config));
    match &config.scratch_root {
        Some(root) => runner.with_scratch_root(root),
        None => runner,
    }
}

pub fn orchestrator(config: &PipelineConfig) -> Orchestrator {
    Orchestrator::new(pipeline_runner(config))
}

// ============================================================================
// TESTS
// ============================================================================
