//! Per-label extraction: mask, iso-surface, smoothing, STL file.
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::labels::LabelSpec;
use crate::marching_cubes::marching_cubes;
use crate::mesh::MeshData;
use crate::smoothing::{smooth, SmoothingParams};
use crate::stl::write_binary_stl;
use crate::volume::LabeledVolume;

pub const MESH_EXT: &str = "stl";

/// What happened to one requested label.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOutcome {
    Saved {
        label: i32,
        name: String,
        path: PathBuf,
        triangles: usize,
    },
    /// The label has no voxels in the volume.
    Skipped { label: i32, name: String },
}

impl LabelOutcome {
    pub fn label(&self) -> i32 {
        match self {
            LabelOutcome::Saved { label, .. } | LabelOutcome::Skipped { label, .. } => *label,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, LabelOutcome::Saved { .. })
    }
}

/// Stateless across calls; holds only naming and smoothing settings.
#[derive(Debug, Clone, Default)]
pub struct MeshExtractor {
    labels: LabelSpec,
    smoothing: SmoothingParams,
}

impl MeshExtractor {
    pub fn new(labels: LabelSpec, smoothing: SmoothingParams) -> Self {
        Self { labels, smoothing }
    }

    pub fn label_spec(&self) -> &LabelSpec {
        &self.labels
    }

    /// Iso-surface of one label, smoothed unless the raw surface is empty.
    /// `None` when the label has no voxels.
    pub fn mesh_for_label(&self, volume: &LabeledVolume, label: i32) -> Option<MeshData> {
        let mask = volume.mask(label);
        if mask.is_empty() {
            return None;
        }

        let raw = marching_cubes(&mask);
        debug!(
            label,
            voxels = mask.count(),
            vertices = raw.vertex_count(),
            triangles = raw.triangle_count(),
            "iso-surface extracted"
        );
        if raw.is_empty() {
            return Some(raw);
        }
        Some(smooth(&raw, &self.smoothing))
    }

    /// Extracts and saves one label as `<name>.stl` in `out_dir`.
    pub fn extract_label(
        &self,
        volume: &LabeledVolume,
        label: i32,
        out_dir: &Path,
    ) -> Result<LabelOutcome> {
        let name = self.labels.name(label);
        let Some(mesh) = self.mesh_for_label(volume, label) else {
            info!(label, name = %name, "no voxels for label, skipping");
            return Ok(LabelOutcome::Skipped { label, name });
        };

        let path = out_dir.join(self.labels.file_name(label, MESH_EXT));
        write_binary_stl(&mesh, &path)?;
        info!(
            label,
            name = %name,
            triangles = mesh.triangle_count(),
            path = %path.display(),
            "mesh saved"
        );

        Ok(LabelOutcome::Saved {
            label,
            name,
            path,
            triangles: mesh.triangle_count(),
        })
    }

    /// Runs [`extract_label`](Self::extract_label) for each label in order.
    /// Stops at the first write failure.
    pub fn extract(
        &self,
        volume: &LabeledVolume,
        labels: &[i32],
        out_dir: &Path,
    ) -> Result<Vec<LabelOutcome>> {
        labels
            .iter()
            .map(|&label| self.extract_label(volume, label, out_dir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> LabeledVolume {
        let dims = [8, 8, 8];
        let mut labels = vec![0; 512];
        for z in 2..5 {
            for y in 2..5 {
                for x in 1..3 {
                    labels[x + 8 * (y + 8 * z)] = 1;
                }
                for x in 4..7 {
                    labels[x + 8 * (y + 8 * z)] = 2;
                }
            }
        }
        LabeledVolume::from_raw(dims, labels).unwrap()
    }

    #[test]
    fn test_saves_only_present_labels() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = MeshExtractor::default();
        let outcomes = extractor
            .extract(&two_blobs(), &[1, 2, 3, 4, 5], dir.path())
            .unwrap();

        let saved: Vec<i32> = outcomes.iter().filter(|o| o.is_saved()).map(|o| o.label()).collect();
        assert_eq!(saved, vec![1, 2]);
        assert!(dir.path().join("Upper_Skull.stl").exists());
        assert!(dir.path().join("Mandible.stl").exists());
        for name in ["Upper_Teeth", "Lower_Teeth", "Mandibular_canal"] {
            assert!(!dir.path().join(format!("{name}.stl")).exists());
        }
        assert_eq!(
            outcomes[2],
            LabelOutcome::Skipped {
                label: 3,
                name: "Upper_Teeth".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_label_uses_generic_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut labels = vec![0; 27];
        labels[13] = 9;
        let volume = LabeledVolume::from_raw([3, 3, 3], labels).unwrap();
        let outcome = MeshExtractor::default()
            .extract_label(&volume, 9, dir.path())
            .unwrap();
        assert!(outcome.is_saved());
        assert!(dir.path().join("label_9.stl").exists());
    }

    #[test]
    fn test_smoothing_keeps_triangle_count() {
        let volume = two_blobs();
        let raw = marching_cubes(&volume.mask(2));
        let smoothed = MeshExtractor::default().mesh_for_label(&volume, 2).unwrap();
        assert_eq!(smoothed.triangles, raw.triangles);
        assert_ne!(smoothed.vertices, raw.vertices);
    }

    #[test]
    fn test_degenerate_surface_is_saved_unsmoothed() {
        let dir = tempfile::tempdir().unwrap();
        // a single-slice volume has no cells
        let volume = LabeledVolume::from_raw([3, 3, 1], vec![1; 9]).unwrap();
        let outcome = MeshExtractor::default()
            .extract_label(&volume, 1, dir.path())
            .unwrap();
        match outcome {
            LabelOutcome::Saved { triangles, path, .. } => {
                assert_eq!(triangles, 0);
                assert_eq!(std::fs::metadata(path).unwrap().len(), 84);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
