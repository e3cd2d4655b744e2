//! Unified Error Model
use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions of a run. Any of these aborts the whole batch.
///
/// Cancellation is not represented here; see [`crate::StageOutcome`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("VALIDATION/expected exactly one converted volume in {dir}, found {found}")]
    Validation { dir: PathBuf, found: usize },

    #[error("PROCESS/command exited with {}: {command}", exit_code(.code))]
    ProcessFailure { command: String, code: Option<i32> },

    #[error("PROCESS/failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("NOTFOUND/{}", .path.display())]
    NotFound { path: PathBuf },

    #[error("WRITE/{}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("VOLUME/{}: {message}", .path.display())]
    Volume { path: PathBuf, message: String },

    #[error("REQUEST/{0}")]
    Request(String),

    #[error("BUSY/a run is already in progress")]
    Busy,

    #[error("IO/{0}")]
    Io(#[from] std::io::Error),
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
