//! Naming/Layout Resolver: per-case directories and the fixed filenames the
//! external tools expect or produce.
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{PipelineError, Result};

/// Extension of compressed volumes written by the converter.
pub const VOLUME_EXT: &str = "nii.gz";
/// Input name the segmentation tool expects (`<case>_<channel>`).
pub const CANONICAL_VOLUME: &str = "case_0000.nii.gz";
/// Output name the segmentation tool writes.
pub const SEGMENTATION_FILE: &str = "case.nii.gz";
pub const OUTPUT_SUFFIX: &str = "_stl";

const VOLUME_SCRATCH: &str = "input_volume";
const SEGMENTATION_SCRATCH: &str = "output_segmentation";
const WORKSPACE_PREFIX: &str = "dcmesh-";

/// Final folder name of an input directory, lossily decoded.
pub fn case_name(input_dir: &Path) -> String {
    input_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "case".to_string())
}

/// `<output_root>/<basename(input_dir)>_stl`
pub fn case_output_dir(output_root: &Path, input_dir: &Path) -> PathBuf {
    output_root.join(format!("{}{}", case_name(input_dir), OUTPUT_SUFFIX))
}

/// Renames the single converted volume in `dir` to [`CANONICAL_VOLUME`].
///
/// Returns the original file name and the new path. Zero or several
/// candidates is a hard precondition failure.
pub fn rename_converted_volume(dir: &Path) -> Result<(String, PathBuf)> {
    let suffix = format!(".{VOLUME_EXT}");
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(&suffix) {
            candidates.push(name);
        }
    }

    if candidates.len() != 1 {
        return Err(PipelineError::Validation {
            dir: dir.to_path_buf(),
            found: candidates.len(),
        });
    }

    let original = candidates.remove(0);
    let target = dir.join(CANONICAL_VOLUME);
    if original != CANONICAL_VOLUME {
        fs::rename(dir.join(&original), &target)?;
    }
    Ok((original, target))
}

/// Scratch area for one case. The directory tree is deleted when this value
/// is dropped, whatever path the case took out of the pipeline.
#[derive(Debug)]
pub struct CaseWorkspace {
    root: TempDir,
    volume_dir: PathBuf,
    segmentation_dir: PathBuf,
}

impl CaseWorkspace {
    /// Creates the workspace under `scratch_root`, or the system temp dir.
    pub fn create(scratch_root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let root = match scratch_root {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        let volume_dir = root.path().join(VOLUME_SCRATCH);
        let segmentation_dir = root.path().join(SEGMENTATION_SCRATCH);
        fs::create_dir_all(&volume_dir)?;
        fs::create_dir_all(&segmentation_dir)?;

        Ok(Self {
            root,
            volume_dir,
            segmentation_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn volume_dir(&self) -> &Path {
        &self.volume_dir
    }

    pub fn segmentation_dir(&self) -> &Path {
        &self.segmentation_dir
    }
}
