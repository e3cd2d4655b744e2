//! Pipeline configuration (YAML).
//!
//! Every field has a default, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! converter:
//!   program: dcm2niix
//! segmentation:
//!   program: nnUNetv2_predict
//!   dataset: Dataset111_453CT
//!   configuration: 3d_fullres
//!   fold: "0"
//!   model_root: /opt/models
//! mesh:
//!   labels: [1, 2, 3, 4, 5]
//!   label_names:
//!     6: Hyoid
//!   smoothing:
//!     iterations: 30
//!     pass_band: 0.01
//! process:
//!   terminate_grace_ms: 5000
//! scratch_root: /tmp/dcmesh
//! ```
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dcmesh_mesh::{LabelSpec, SmoothingParams, DEFAULT_LABELS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CONFIG/invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("CONFIG/{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub converter: ConverterConfig,
    pub segmentation: SegmentationConfig,
    pub mesh: MeshConfig,
    pub process: ProcessConfig,
    /// Parent of per-case scratch workspaces; system temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "dcm2niix".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub program: String,
    pub dataset: String,
    pub configuration: String,
    pub fold: String,
    /// Holds `nnUNet_raw`, `nnUNet_preprocessed` and `nnUNet_results`
    /// unless those are set individually.
    pub model_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessed_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            program: "nnUNetv2_predict".to_string(),
            dataset: "Dataset111_453CT".to_string(),
            configuration: "3d_fullres".to_string(),
            fold: "0".to_string(),
            model_root: PathBuf::from("."),
            raw_dir: None,
            preprocessed_dir: None,
            results_dir: None,
        }
    }
}

impl SegmentationConfig {
    pub fn model_paths(&self) -> ModelPaths {
        let pick = |dir: &Option<PathBuf>, name: &str| {
            dir.clone().unwrap_or_else(|| self.model_root.join(name))
        };
        ModelPaths {
            raw: pick(&self.raw_dir, ModelPaths::RAW_VAR),
            preprocessed: pick(&self.preprocessed_dir, ModelPaths::PREPROCESSED_VAR),
            results: pick(&self.results_dir, ModelPaths::RESULTS_VAR),
        }
    }
}

/// The three directories the segmentation tool reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub raw: PathBuf,
    pub preprocessed: PathBuf,
    pub results: PathBuf,
}

impl ModelPaths {
    pub const RAW_VAR: &'static str = "nnUNet_raw";
    pub const PREPROCESSED_VAR: &'static str = "nnUNet_preprocessed";
    pub const RESULTS_VAR: &'static str = "nnUNet_results";

    /// Creates any missing directory.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.raw, &self.preprocessed, &self.results] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Environment for the segmentation child process.
    pub fn env_vars(&self) -> [(&'static str, &Path); 3] {
        [
            (Self::RAW_VAR, self.raw.as_path()),
            (Self::PREPROCESSED_VAR, self.preprocessed.as_path()),
            (Self::RESULTS_VAR, self.results.as_path()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub labels: Vec<i32>,
    /// Merged over the anatomical names.
    pub label_names: BTreeMap<i32, String>,
    pub smoothing: SmoothingParams,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.to_vec(),
            label_names: BTreeMap::new(),
            smoothing: SmoothingParams::default(),
        }
    }
}

impl MeshConfig {
    pub fn label_spec(&self) -> LabelSpec {
        LabelSpec::anatomical().with_overrides(&self.label_names)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Wait between the terminate signal and a forced kill.
    pub terminate_grace_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            terminate_grace_ms: 5000,
        }
    }
}

impl ProcessConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.converter.program.trim().is_empty() {
            return Err(ConfigError::Invalid("converter.program is empty".into()));
        }
        if self.segmentation.program.trim().is_empty() {
            return Err(ConfigError::Invalid("segmentation.program is empty".into()));
        }
        let p = self.mesh.smoothing.pass_band;
        if !(p > 0.0 && p <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "mesh.smoothing.pass_band must be in (0, 2], got {p}"
            )));
        }
        Ok(())
    }
}
