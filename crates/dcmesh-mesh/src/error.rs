//! Mesh engine errors
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("VOLUME/{}: {message}", .path.display())]
    Volume { path: PathBuf, message: String },

    #[error("SHAPE/{0}")]
    Shape(String),

    #[error("WRITE/{}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("IO/{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
