//! Data Model: PipelineRequest, Case, RunState, StageEvent, RunSummary
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::layout::{self, CaseWorkspace};

/// Upper bound on input directories per run.
pub const MAX_CASES: usize = 5;

/// Compute device handed to the segmentation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// Value passed to `-device`.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            other => Err(format!("unknown device '{other}' (expected cpu, cuda or mps)")),
        }
    }
}

/// One batch submission. Immutable once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Input study directories, processed in order
    pub input_dirs: Vec<PathBuf>,
    /// Root under which `<input>_stl` directories are created
    pub output_root: PathBuf,
    pub device: Device,
}

impl PipelineRequest {
    pub fn new(input_dirs: Vec<PathBuf>, output_root: impl Into<PathBuf>, device: Device) -> Self {
        Self {
            input_dirs,
            output_root: output_root.into(),
            device,
        }
    }

    /// Rejects requests the worker should never see.
    pub fn validate(&self) -> Result<()> {
        if self.input_dirs.is_empty() {
            return Err(PipelineError::Request("at least one input directory is required".into()));
        }
        if self.input_dirs.len() > MAX_CASES {
            return Err(PipelineError::Request(format!(
                "{} input directories given, at most {} are accepted",
                self.input_dirs.len(),
                MAX_CASES
            )));
        }
        if !self.output_root.is_dir() {
            return Err(PipelineError::Request(format!(
                "output root {} is not a directory",
                self.output_root.display()
            )));
        }
        for dir in &self.input_dirs {
            if !dir.is_dir() {
                return Err(PipelineError::Request(format!(
                    "input {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// One input study as it moves through the stages.
#[derive(Debug)]
pub struct Case {
    pub index: usize,
    pub name: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workspace: CaseWorkspace,
}

impl Case {
    /// Creates the output directory and a fresh scratch workspace.
    pub fn open(
        index: usize,
        input_dir: &Path,
        output_root: &Path,
        scratch_root: Option<&Path>,
    ) -> Result<Self> {
        let output_dir = layout::case_output_dir(output_root, input_dir);
        std::fs::create_dir_all(&output_dir)?;
        let workspace = CaseWorkspace::create(scratch_root)?;

        Ok(Self {
            index,
            name: layout::case_name(input_dir),
            input_dir: input_dir.to_path_buf(),
            output_dir,
            workspace,
        })
    }

    pub fn volume_dir(&self) -> &Path {
        self.workspace.volume_dir()
    }

    pub fn segmentation_dir(&self) -> &Path {
        self.workspace.segmentation_dir()
    }

    /// File the segmentation tool is expected to write.
    pub fn segmentation_file(&self) -> PathBuf {
        self.segmentation_dir().join(layout::SEGMENTATION_FILE)
    }
}

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Cancelling)
    }
}

/// Terminal status reported to the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn terminal_state(&self) -> RunState {
        match self {
            RunStatus::Success => RunState::Succeeded,
            RunStatus::Error => RunState::Failed,
            RunStatus::Cancelled => RunState::Cancelled,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Events delivered to subscribers, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    LogLine { text: String },
    Progress { percent: u8 },
    SegmentationStarted,
    SegmentationFinished,
    RunFinished { status: RunStatus, message: String },
}

/// Result of a stage that may be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub id: String,
    pub latency_ms: u64,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub name: String,
    pub output_dir: PathBuf,
    pub stages: Vec<StageReport>,
}

/// What the worker hands back when it exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cases: Vec<CaseReport>,
}
