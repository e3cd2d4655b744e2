//! Stage "mesh": one STL file per non-empty label of the segmentation.
use std::path::Path;

use dcmesh_core::{Case, ExecutionContext, PipelineError, Result, Stage, StageOutcome};
use dcmesh_mesh::{LabelOutcome, LabeledVolume, MeshError, MeshExtractor};
use tracing::info;

use crate::config::MeshConfig;

pub struct MeshStage {
    extractor: MeshExtractor,
    labels: Vec<i32>,
}

impl MeshStage {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            extractor: MeshExtractor::new(config.label_spec(), config.smoothing),
            labels: config.labels.clone(),
        }
    }
}

impl Default for MeshStage {
    fn default() -> Self {
        Self::new(&MeshConfig::default())
    }
}

impl Stage for MeshStage {
    fn id(&self) -> &'static str {
        "mesh.marching_cubes"
    }

    fn progress_mark(&self) -> f64 {
        1.0
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> Result<StageOutcome> {
        let segmentation = case.segmentation_file();
        if !segmentation.is_file() {
            return Err(PipelineError::NotFound { path: segmentation });
        }

        ctx.log(format!("loading segmentation {}", segmentation.display()));
        let volume = LabeledVolume::from_nifti(&segmentation)
            .map_err(|e| mesh_error(e, &segmentation))?;

        for &label in &self.labels {
            if ctx.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }
            let outcome = self
                .extractor
                .extract_label(&volume, label, &case.output_dir)
                .map_err(|e| mesh_error(e, &segmentation))?;

            match &outcome {
                LabelOutcome::Saved {
                    name, triangles, ..
                } => ctx.log(format!("saved {name}.stl ({triangles} triangles)")),
                LabelOutcome::Skipped { name, .. } => {
                    ctx.log(format!("no voxels for label {label} ({name}), skipped"))
                }
            }
        }

        info!(case = %case.name, output = %case.output_dir.display(), "meshes written");
        Ok(StageOutcome::Completed)
    }
}

fn mesh_error(err: MeshError, segmentation: &Path) -> PipelineError {
    match err {
        MeshError::Write { path, message } => PipelineError::Write { path, message },
        MeshError::Volume { path, message } => PipelineError::Volume { path, message },
        MeshError::Shape(message) => PipelineError::Volume {
            path: segmentation.to_path_buf(),
            message,
        },
        MeshError::Io(err) => PipelineError::Io(err),
    }
}
