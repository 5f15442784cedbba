//! Sync Driver: one run from setup to summary.
//!
//! ```text
//! setup -> Diffing -> Dispatching -> Cleaning -> Reporting -> Done
//! ```
//!
//! Setup failures abort before anything is written. Once dispatching has
//! started only an operator interrupt stops the run, and an interrupted run
//! never deletes anything.

use crate::cancel::CancellationToken;
use crate::codec::CodecSet;
use crate::config::SyncConfig;
use crate::differ::{SyncPlan, TreeDiffer};
use crate::error::{DiscoveryError, Result, SyncError};
use crate::jobs::{self, JobContext};
use crate::pool::WorkerPool;
use crate::types::{ActionKind, JobResult, SyncSummary, TargetEntry};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Diffing,
    Dispatching,
    Cleaning,
    Reporting,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Diffing => "diffing",
            SyncState::Dispatching => "dispatching",
            SyncState::Cleaning => "cleaning",
            SyncState::Reporting => "reporting",
            SyncState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything a finished run has to say.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub summary: SyncSummary,
    /// Planned target changes, in plan order.
    pub planned: Vec<(ActionKind, PathBuf)>,
    /// One result per executed or skipped action.
    pub results: Vec<JobResult>,
    pub errors: Vec<DiscoveryError>,
    /// States entered, in order.
    pub transitions: Vec<SyncState>,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

/// Drives one synchronization of `source_root` into `target_root`.
pub struct SyncDriver {
    source_root: PathBuf,
    target_root: PathBuf,
    config: SyncConfig,
    codecs: CodecSet,
    cancel: CancellationToken,
    transitions: Vec<SyncState>,
}

impl SyncDriver {
    pub fn new(
        source_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
        config: SyncConfig,
        codecs: CodecSet,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
            config,
            codecs,
            cancel: CancellationToken::new(),
            transitions: Vec::new(),
        }
    }

    /// Use an externally owned token, e.g. one fired by a signal handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, next: SyncState) {
        match self.transitions.last() {
            Some(prev) => debug!("State {} -> {}", prev, next),
            None => debug!("State {}", next),
        }
        self.transitions.push(next);
    }

    /// Execute the run.
    ///
    /// Returns `Err` only for setup and configuration problems; per-file
    /// failures are reported in the returned summary.
    pub async fn run(mut self) -> Result<SyncReport> {
        let started = Instant::now();
        self.config.validate()?;
        self.setup()?;

        self.enter(SyncState::Diffing);
        let differ = TreeDiffer::new(
            &self.source_root,
            &self.target_root,
            &self.codecs,
            &self.config.exclude,
        )?;
        let plan = tokio::task::spawn_blocking(move || differ.diff()).await?;

        let mut summary = SyncSummary {
            discovery_errors: plan.errors.len(),
            ..SyncSummary::default()
        };
        let planned = plan.outline();

        if self.config.dry_run {
            for (kind, path) in &planned {
                info!("Would {} {}", kind, path.display());
            }
            summary.skipped = plan.skipped();
            return Ok(self.report(summary, planned, Vec::new(), plan.errors, started));
        }

        let has_transcodes = plan
            .actions
            .iter()
            .any(|a| a.kind() == ActionKind::Transcode);
        if has_transcodes {
            self.codecs
                .check_available()
                .map_err(SyncError::CodecUnavailable)?;
        }

        self.enter(SyncState::Dispatching);
        let mut results = self.prepare_target(&plan);

        let ctx = Arc::new(JobContext {
            source_root: self.source_root.clone(),
            target_root: self.target_root.clone(),
            codecs: self.codecs.clone(),
            quality: self.config.quality().to_string(),
            pipe: self.config.pipe,
            cancel: self.cancel.clone(),
        });
        let pool = WorkerPool::new(self.config.num_processes);
        let finished = pool
            .run_all(plan.jobs(), self.cancel.clone(), move |action| {
                jobs::run_action(&ctx, action)
            })
            .await;
        results.extend(finished);

        if self.cancel.is_cancelled() {
            warn!("Interrupted; leaving extraneous files in place");
            summary.cancelled = true;
        } else {
            self.enter(SyncState::Cleaning);
            for target in plan.extraneous() {
                results.push(self.delete(target, false));
            }
        }

        for result in &results {
            summary.record(result);
        }
        Ok(self.report(summary, planned, results, plan.errors, started))
    }

    /// Validate the roots before anything is planned or written.
    fn setup(&self) -> Result<()> {
        let source_meta = fs::metadata(&self.source_root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SyncError::SourceNotFound(self.source_root.clone()),
            _ => SyncError::Io(e),
        })?;
        if !source_meta.is_dir() {
            return Err(SyncError::SourceNotDirectory(self.source_root.clone()));
        }

        let source = fs::canonicalize(&self.source_root)?;
        let target = resolve(&self.target_root)?;
        if target.starts_with(&source) || source.starts_with(&target) {
            return Err(SyncError::Overlap {
                source_root: self.source_root.clone(),
                target_root: self.target_root.clone(),
            });
        }

        match fs::metadata(&self.target_root) {
            Ok(meta) if !meta.is_dir() => {
                return Err(SyncError::TargetNotDirectory(self.target_root.clone()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.config.dry_run {
                    info!("Creating target directory {}", self.target_root.display());
                    fs::create_dir_all(&self.target_root).map_err(|source| {
                        SyncError::TargetNotWritable {
                            path: self.target_root.clone(),
                            source,
                        }
                    })?;
                }
            }
            Err(e) => return Err(SyncError::Io(e)),
        }

        if !self.config.dry_run {
            tempfile::Builder::new()
                .prefix(".harmonize-probe")
                .tempfile_in(&self.target_root)
                .map_err(|source| SyncError::TargetNotWritable {
                    path: self.target_root.clone(),
                    source,
                })?;
        }

        Ok(())
    }

    /// Clear blocking entries and create directories, parent-first.
    fn prepare_target(&self, plan: &SyncPlan) -> Vec<JobResult> {
        let mut results = Vec::new();

        for blocker in &plan.blocking {
            results.push(self.delete(blocker, true));
        }

        for dir in plan.directories() {
            let path = self.target_root.join(&dir.relative_path);
            debug!(path = %path.display(), "Creating directory");
            match fs::create_dir_all(&path) {
                Ok(()) => results.push(JobResult::success(
                    &dir.relative_path,
                    ActionKind::EnsureDirectory,
                )),
                Err(e) => {
                    error!("Cannot create directory {}: {}", path.display(), e);
                    results.push(JobResult::failed(
                        &dir.relative_path,
                        ActionKind::EnsureDirectory,
                        e.to_string(),
                    ));
                }
            }
        }

        for action in &plan.actions {
            if action.kind() == ActionKind::Skip {
                results.push(JobResult::skipped(action.relative_path()));
            }
        }

        results
    }

    /// Remove one target entry. Blocking directories go with their contents;
    /// extraneous directories are already empty by the time they are reached.
    fn delete(&self, target: &TargetEntry, recursive: bool) -> JobResult {
        let path = self.target_root.join(&target.relative_path);
        info!("Deleting {}", path.display());
        let removed = match (target.is_dir, recursive) {
            (true, true) => fs::remove_dir_all(&path),
            (true, false) => fs::remove_dir(&path),
            (false, _) => fs::remove_file(&path),
        };

        match removed {
            Ok(()) => JobResult::success(&target.relative_path, ActionKind::DeleteExtraneous),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                JobResult::success(&target.relative_path, ActionKind::DeleteExtraneous)
            }
            Err(e) => {
                error!("Cannot delete {}: {}", path.display(), e);
                JobResult::failed(
                    &target.relative_path,
                    ActionKind::DeleteExtraneous,
                    e.to_string(),
                )
            }
        }
    }

    fn report(
        mut self,
        mut summary: SyncSummary,
        planned: Vec<(ActionKind, PathBuf)>,
        results: Vec<JobResult>,
        errors: Vec<DiscoveryError>,
        started: Instant,
    ) -> SyncReport {
        self.enter(SyncState::Reporting);
        summary.elapsed = started.elapsed();
        info!(
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Summary: {}", summary
        );
        info!("Processing complete");
        self.enter(SyncState::Done);

        SyncReport {
            summary,
            planned,
            results,
            errors,
            transitions: self.transitions,
        }
    }
}

/// Absolute form of a path that may not exist yet.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Ok(resolved);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(resolve(parent)?.join(name)),
        _ => Ok(absolute),
    }
}
