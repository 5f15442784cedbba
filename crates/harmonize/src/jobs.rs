//! Transcode and Copy jobs
//!
//! Each job turns one source file into one installed target file, or fails
//! leaving the previous target (if any) untouched. Errors are converted into
//! a [`JobResult`] at the job boundary.

use crate::cancel::CancellationToken;
use crate::codec::CodecSet;
use crate::config::PipeConfig;
use crate::error::JobError;
use crate::install::StagedFile;
use crate::pipe;
use crate::types::{Action, JobResult, SourceEntry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Everything a job needs; shared read-only across workers.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub codecs: CodecSet,
    pub quality: String,
    pub pipe: PipeConfig,
    pub cancel: CancellationToken,
}

/// Execute a Transcode or Copy action and report its outcome.
pub fn run_action(ctx: &JobContext, action: &Action) -> JobResult {
    let relative_path = action.relative_path().to_path_buf();
    let kind = action.kind();

    let outcome = match action {
        Action::Transcode { source, target } => transcode(ctx, source, target),
        Action::Copy { source, target } => copy(ctx, source, target),
        other => {
            return JobResult::failed(
                relative_path,
                kind,
                format!("{} is not executed by the worker pool", other.kind()),
            )
        }
    };

    match outcome {
        Ok(bytes) => {
            debug!(path = %relative_path.display(), bytes, "Job complete");
            JobResult::success(relative_path, kind)
        }
        Err(err) => {
            error!("Failed to {} {}: {}", kind, relative_path.display(), err);
            JobResult::failed(relative_path, kind, err.to_string())
        }
    }
}

/// Decode, encode, tag and install one audio file.
pub fn transcode(ctx: &JobContext, source: &SourceEntry, target: &Path) -> Result<u64, JobError> {
    if ctx.cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    let source_path = ctx.source_root.join(&source.relative_path);
    let target_path = ctx.target_root.join(target);
    info!("Transcoding {}", source_path.display());

    let staged = StagedFile::create(&target_path).map_err(JobError::Install)?;
    let decoded = ctx
        .codecs
        .decoder
        .open(&source_path)
        .map_err(JobError::Decode)?;
    let encoder = match ctx.codecs.encoder.open(staged.path(), &ctx.quality) {
        Ok(encoder) => encoder,
        Err(e) => {
            decoded.abort();
            return Err(JobError::Encode(e));
        }
    };

    let bytes = pipe::transfer(decoded, encoder, &ctx.pipe, &ctx.cancel)?;

    match ctx.codecs.tagger.copy_tags(&source_path, staged.path()) {
        Ok(count) => debug!(path = %source_path.display(), count, "Copied tags"),
        Err(e) => warn!("Cannot copy tags for {}: {}", target_path.display(), e),
    }

    staged.stamp(source).map_err(JobError::Install)?;
    staged.publish().map_err(JobError::Install)?;
    Ok(bytes)
}

/// Copy one file verbatim and install it.
pub fn copy(ctx: &JobContext, source: &SourceEntry, target: &Path) -> Result<u64, JobError> {
    if ctx.cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    let source_path = ctx.source_root.join(&source.relative_path);
    let target_path = ctx.target_root.join(target);
    info!("Copying {}", source_path.display());

    let staged = StagedFile::create(&target_path).map_err(JobError::Install)?;
    let bytes = fs::copy(&source_path, staged.path()).map_err(JobError::Copy)?;
    staged.stamp(source).map_err(JobError::Install)?;
    staged.publish().map_err(JobError::Install)?;
    Ok(bytes)
}

/// Result for an action that never ran because the run was interrupted.
pub fn cancelled_result(action: &Action) -> JobResult {
    JobResult::failed(
        action.relative_path(),
        action.kind(),
        JobError::Cancelled.to_string(),
    )
}
