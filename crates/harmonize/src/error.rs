//! Error types for the sync engine
//!
//! Per-file errors (`DiscoveryError`, `JobError`, `TagError`) never abort a
//! run; they are converted into reported results. `SyncError` is reserved for
//! conditions that stop the run before any job is dispatched.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fatal errors that abort a run before dispatching.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("Target is not a directory: {}", .0.display())]
    TargetNotDirectory(PathBuf),

    #[error("Target directory is not writable: {}: {source}", .path.display())]
    TargetNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source '{}' and target '{}' overlap", .source_root.display(), .target_root.display())]
    Overlap {
        source_root: PathBuf,
        target_root: PathBuf,
    },

    #[error("Codec unavailable: {0}")]
    CodecUnavailable(#[source] CodecError),

    #[error("Invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised by decoders and encoders.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{tool} not found (install it or set {env_var})")]
    NotFound { tool: String, env_var: String },

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} reported errors: {stderr}")]
    Diagnostics { tool: String, stderr: String },

    #[error("Corrupt input: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a Stream Pipe transfer, naming the side that failed.
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("decoder failed: {0}")]
    Decode(#[source] CodecError),

    #[error("encoder failed: {0}")]
    Encode(#[source] CodecError),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Non-fatal tag copy failure.
#[derive(Error, Debug)]
pub enum TagError {
    #[error("{0}")]
    Lofty(#[from] lofty::error::LoftyError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-entry problem found while walking the trees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Cannot read {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("{} collides with the transcoded output of {}", .path.display(), .audio.display())]
    Collision { path: PathBuf, audio: PathBuf },
}

impl DiscoveryError {
    /// Relative path the error is attributed to.
    pub fn path(&self) -> &Path {
        match self {
            DiscoveryError::Unreadable { path, .. } => path,
            DiscoveryError::Collision { path, .. } => path,
        }
    }
}

/// Failure of a single Transcode/Copy job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("decode failed: {0}")]
    Decode(#[source] CodecError),

    #[error("encode failed: {0}")]
    Encode(#[source] CodecError),

    #[error("copy failed: {0}")]
    Copy(#[source] io::Error),

    #[error("install failed: {0}")]
    Install(#[source] io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

impl From<PipeError> for JobError {
    fn from(err: PipeError) -> Self {
        match err {
            PipeError::Decode(e) => JobError::Decode(e),
            PipeError::Encode(e) => JobError::Encode(e),
            PipeError::Cancelled => JobError::Cancelled,
            PipeError::Panicked(side) => JobError::Panicked(side),
        }
    }
}

/// Result type alias for fatal sync errors.
pub type Result<T> = std::result::Result<T, SyncError>;
