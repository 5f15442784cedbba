//! Core data types: tree entries, actions, job results and the run summary.

use filetime::FileTime;
use std::fmt;
use std::fs::Permissions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Classification of a source filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    AudioFile,
    OtherFile,
    Directory,
}

/// One filesystem object under the source root.
///
/// `modified` and `permissions` are captured once during the walk. Jobs stamp
/// these values onto their output and never stat the source again, so a file
/// rewritten mid-run is detected as stale on the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub modified: FileTime,
    pub permissions: Permissions,
}

impl SourceEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One filesystem object under the target root, keyed by relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub relative_path: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
    pub modified: Option<FileTime>,
}

impl TargetEntry {
    /// A target file is current when it is a regular file at least as new as
    /// the captured source mtime.
    pub fn is_current_for(&self, source: &SourceEntry) -> bool {
        match self.modified {
            Some(modified) => self.exists && !self.is_dir && modified >= source.modified,
            None => false,
        }
    }
}

/// Decision for one path in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Target present and not older than the source.
    Skip { source: SourceEntry, target: PathBuf },
    /// Audio file to decode, encode, tag and install at `target`.
    Transcode { source: SourceEntry, target: PathBuf },
    /// Other file to copy verbatim to `target`.
    Copy { source: SourceEntry, target: PathBuf },
    /// Source directory with no directory at the same target path.
    EnsureDirectory { source: SourceEntry },
    /// Target path with no source counterpart.
    DeleteExtraneous { target: TargetEntry },
}

/// Variant tag of an [`Action`], used in results and plan outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Skip,
    Transcode,
    Copy,
    EnsureDirectory,
    DeleteExtraneous,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Skip => "skip",
            ActionKind::Transcode => "transcode",
            ActionKind::Copy => "copy",
            ActionKind::EnsureDirectory => "mkdir",
            ActionKind::DeleteExtraneous => "delete",
        };
        f.write_str(name)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Skip { .. } => ActionKind::Skip,
            Action::Transcode { .. } => ActionKind::Transcode,
            Action::Copy { .. } => ActionKind::Copy,
            Action::EnsureDirectory { .. } => ActionKind::EnsureDirectory,
            Action::DeleteExtraneous { .. } => ActionKind::DeleteExtraneous,
        }
    }

    /// Path the action is attributed to: the source path for source-derived
    /// actions, the target path for deletions.
    pub fn relative_path(&self) -> &Path {
        match self {
            Action::Skip { source, .. }
            | Action::Transcode { source, .. }
            | Action::Copy { source, .. }
            | Action::EnsureDirectory { source } => &source.relative_path,
            Action::DeleteExtraneous { target } => &target.relative_path,
        }
    }

    /// Transcode and Copy are the only actions executed by the worker pool.
    pub fn is_job(&self) -> bool {
        matches!(self, Action::Transcode { .. } | Action::Copy { .. })
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    SkippedAlreadyCurrent,
    Failed(String),
}

/// Result of one action, attributed to a relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub relative_path: PathBuf,
    pub action: ActionKind,
    pub status: JobStatus,
}

impl JobResult {
    pub fn success(relative_path: impl Into<PathBuf>, action: ActionKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            action,
            status: JobStatus::Success,
        }
    }

    pub fn skipped(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            action: ActionKind::Skip,
            status: JobStatus::SkippedAlreadyCurrent,
        }
    }

    pub fn failed(
        relative_path: impl Into<PathBuf>,
        action: ActionKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            action,
            status: JobStatus::Failed(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }
}

/// Counts per outcome category for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub skipped: usize,
    pub transcoded: usize,
    pub copied: usize,
    pub directories_created: usize,
    pub deleted: usize,
    pub failed: usize,
    pub discovery_errors: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl SyncSummary {
    /// Fold one result into the counters.
    pub fn record(&mut self, result: &JobResult) {
        match (&result.status, result.action) {
            (JobStatus::Failed(_), _) => self.failed += 1,
            (JobStatus::SkippedAlreadyCurrent, _) | (_, ActionKind::Skip) => self.skipped += 1,
            (JobStatus::Success, ActionKind::Transcode) => self.transcoded += 1,
            (JobStatus::Success, ActionKind::Copy) => self.copied += 1,
            (JobStatus::Success, ActionKind::EnsureDirectory) => self.directories_created += 1,
            (JobStatus::Success, ActionKind::DeleteExtraneous) => self.deleted += 1,
        }
    }

    /// Transcodes plus copies that completed.
    pub fn succeeded(&self) -> usize {
        self.transcoded + self.copied
    }

    /// True when nothing failed and every source entry could be read.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.discovery_errors == 0 && !self.cancelled
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transcoded, {} copied, {} skipped, {} deleted, {} failed",
            self.transcoded, self.copied, self.skipped, self.deleted, self.failed
        )?;
        if self.discovery_errors > 0 {
            write!(f, ", {} unreadable", self.discovery_errors)?;
        }
        if self.cancelled {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}
