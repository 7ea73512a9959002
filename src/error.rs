use std::path::PathBuf;
use thiserror::Error;

use crate::cancel::Interrupted;
use crate::transport::TransportError;

/// Packaging and deployment error types
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Project root not found: {path}")]
    ProjectRootNotFound { path: PathBuf },

    #[error("Invalid project root: {path} ({reason})")]
    InvalidProjectRoot { path: PathBuf, reason: &'static str },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to copy {src} to {dst}")]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create staging directory")]
    StagingFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive {path}")]
    ArchiveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Local file not found: {path}")]
    LocalFileMissing { path: PathBuf },

    #[error("Remote transport failed")]
    Transport(#[source] TransportError),

    #[error("Extraction failed with exit code {code}: {stderr}")]
    ExtractionFailed { code: i32, stderr: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for DeployError {
    fn from(err: TransportError) -> Self {
        // Keep interruption distinguishable no matter which layer noticed it
        match err {
            TransportError::Interrupted(reason) => DeployError::Interrupted(reason),
            other => DeployError::Transport(other),
        }
    }
}
