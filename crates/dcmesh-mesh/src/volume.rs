//! Labeled volumes and binary masks.
//!
//! Storage is a flat `Vec` in `(x, y, z)` order with x fastest, the same
//! order NIfTI stores voxels on disk.
use std::path::Path;

use nifti::{IntoNdArray, NiftiObject, NiftiVolume, ReaderOptions};
use tracing::debug;

use crate::error::{MeshError, Result};

/// A read-only 3D array of integer labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledVolume {
    dims: [usize; 3],
    spacing: [f32; 3],
    labels: Vec<i32>,
}

impl LabeledVolume {
    /// Builds a volume from raw labels laid out x fastest.
    pub fn from_raw(dims: [usize; 3], labels: Vec<i32>) -> Result<Self> {
        let expected = dims.iter().product::<usize>();
        if labels.len() != expected {
            return Err(MeshError::Shape(format!(
                "{} labels do not fill a {}x{}x{} volume",
                labels.len(),
                dims[0],
                dims[1],
                dims[2]
            )));
        }
        Ok(Self {
            dims,
            spacing: [1.0; 3],
            labels,
        })
    }

    /// Reads a `.nii` or `.nii.gz` label volume.
    ///
    /// Intensities are rounded to the nearest integer label. For 4-D inputs
    /// only the first frame is kept.
    pub fn from_nifti(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let volume_err = |message: String| MeshError::Volume {
            path: path.to_path_buf(),
            message,
        };

        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| volume_err(e.to_string()))?;
        let pixdim = object.header().pixdim;
        let volume = object.into_volume();

        let raw_dims: Vec<usize> = volume.dim().iter().map(|&d| d as usize).collect();
        if raw_dims.is_empty() || raw_dims.len() > 4 {
            return Err(volume_err(format!(
                "unsupported dimensionality {}",
                raw_dims.len()
            )));
        }
        let dims = [
            raw_dims[0],
            raw_dims.get(1).copied().unwrap_or(1),
            raw_dims.get(2).copied().unwrap_or(1),
        ];

        let array = volume
            .into_ndarray::<f32>()
            .map_err(|e| volume_err(e.to_string()))?;

        let ndim = array.ndim();
        let mut labels = vec![0i32; dims.iter().product()];
        for (idx, value) in array.indexed_iter() {
            if ndim > 3 && idx[3] != 0 {
                continue;
            }
            let x = idx[0];
            let y = if ndim > 1 { idx[1] } else { 0 };
            let z = if ndim > 2 { idx[2] } else { 0 };
            labels[x + dims[0] * (y + dims[1] * z)] = value.round() as i32;
        }

        debug!(
            path = %path.display(),
            dims = ?dims,
            "label volume loaded"
        );

        Ok(Self {
            dims,
            spacing: [pixdim[1], pixdim[2], pixdim[3]],
            labels,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Voxel spacing from the file header. Not applied to mesh coordinates.
    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> i32 {
        self.labels[self.index(x, y, z)]
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Sorted distinct label values present in the volume.
    pub fn present_labels(&self) -> Vec<i32> {
        let mut present: Vec<i32> = self.labels.clone();
        present.sort_unstable();
        present.dedup();
        present
    }

    /// Voxels equal to `label`.
    pub fn mask(&self, label: i32) -> BinaryMask {
        let mut bounds: Option<([usize; 3], [usize; 3])> = None;
        let mut count = 0;
        let mut bits = vec![false; self.labels.len()];

        for z in 0..self.dims[2] {
            for y in 0..self.dims[1] {
                for x in 0..self.dims[0] {
                    let i = self.index(x, y, z);
                    if self.labels[i] != label {
                        continue;
                    }
                    bits[i] = true;
                    count += 1;
                    let p = [x, y, z];
                    bounds = Some(match bounds {
                        None => (p, p),
                        Some((lo, hi)) => (
                            [lo[0].min(x), lo[1].min(y), lo[2].min(z)],
                            [hi[0].max(x), hi[1].max(y), hi[2].max(z)],
                        ),
                    });
                }
            }
        }

        BinaryMask {
            dims: self.dims,
            bits,
            count,
            bounds,
        }
    }
}

/// Inside/outside classification of every voxel for one label.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    dims: [usize; 3],
    bits: Vec<bool>,
    count: usize,
    bounds: Option<([usize; 3], [usize; 3])>,
}

impl BinaryMask {
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Inclusive min/max voxel coordinates of the set voxels.
    pub fn bounds(&self) -> Option<([usize; 3], [usize; 3])> {
        self.bounds
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> bool {
        self.bits[x + self.dims[0] * (y + self.dims[1] * z)]
    }
}
