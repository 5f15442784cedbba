//! Tree Differ: compares the source and target trees and plans the run.
//!
//! The plan is computed from two independent walks. Source entries are
//! classified by extension and mapped to their target paths; every target
//! entry that no source entry maps to is extraneous. The walks never modify
//! either tree.

use crate::codec::{CodecSet, Decoder};
use crate::error::{DiscoveryError, Result};
use crate::install::is_temp_path;
use crate::types::{Action, ActionKind, EntryKind, SourceEntry, TargetEntry};
use filetime::FileTime;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// ============================================================================
// Plan
// ============================================================================

/// Outcome of one diff.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Source-derived actions in walk order (parents before children),
    /// followed by deletions: files first, then directories innermost-first.
    pub actions: Vec<Action>,

    /// Target entries of the wrong kind sitting on a path the run must write
    /// (a file where a directory is expected or the reverse). They are
    /// removed before any directory is created.
    pub blocking: Vec<TargetEntry>,

    /// Per-entry problems; the affected entries are left out of the plan.
    pub errors: Vec<DiscoveryError>,
}

impl SyncPlan {
    /// Transcode and Copy actions, in plan order.
    pub fn jobs(&self) -> Vec<Action> {
        self.actions.iter().filter(|a| a.is_job()).cloned().collect()
    }

    /// Directories to create, parent-first.
    pub fn directories(&self) -> impl Iterator<Item = &SourceEntry> {
        self.actions.iter().filter_map(|action| match action {
            Action::EnsureDirectory { source } => Some(source),
            _ => None,
        })
    }

    /// Extraneous target entries in deletion order.
    pub fn extraneous(&self) -> impl Iterator<Item = &TargetEntry> {
        self.actions.iter().filter_map(|action| match action {
            Action::DeleteExtraneous { target } => Some(target),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind() == ActionKind::Skip)
            .count()
    }

    /// Every action that changes the target, as `(kind, relative path)`.
    pub fn outline(&self) -> Vec<(ActionKind, PathBuf)> {
        let blocking = self
            .blocking
            .iter()
            .map(|t| (ActionKind::DeleteExtraneous, t.relative_path.clone()));
        let planned = self
            .actions
            .iter()
            .filter(|a| a.kind() != ActionKind::Skip)
            .map(|a| (a.kind(), a.relative_path().to_path_buf()));
        blocking.chain(planned).collect()
    }
}

// ============================================================================
// Differ
// ============================================================================

/// Builds a [`SyncPlan`] for one source/target pair.
pub struct TreeDiffer {
    source_root: PathBuf,
    target_root: PathBuf,
    decoder: Arc<dyn Decoder>,
    output_extension: String,
    exclude: GlobSet,
}

impl TreeDiffer {
    /// `exclude` holds glob patterns matched against source-relative paths.
    pub fn new(
        source_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
        codecs: &CodecSet,
        exclude: &[String],
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
            decoder: codecs.decoder.clone(),
            output_extension: codecs.encoder.extension().to_string(),
            exclude: builder.build()?,
        })
    }

    /// Target path for a source file of the given kind.
    pub fn target_path(&self, relative_path: &Path, kind: EntryKind) -> PathBuf {
        match kind {
            EntryKind::AudioFile => relative_path.with_extension(&self.output_extension),
            EntryKind::OtherFile | EntryKind::Directory => relative_path.to_path_buf(),
        }
    }

    /// Walk both trees and plan the run.
    pub fn diff(&self) -> SyncPlan {
        let mut errors = Vec::new();
        // Source paths that could not be read; their target counterparts
        // are never deleted.
        let mut protected: Vec<PathBuf> = Vec::new();

        info!("Scanning \"{}\"", self.source_root.display());
        let sources = self.scan_source(&mut errors, &mut protected);
        info!("Scanned {} items", sources.len());

        let targets = self.scan_target(&mut protected);
        debug!(count = targets.len(), "Scanned target");

        // Audio outputs are assigned before any other file so the audio
        // mapping wins a collision regardless of walk order.
        let source_dirs: HashSet<&Path> = sources
            .iter()
            .filter(|s| s.is_dir())
            .map(|s| s.relative_path.as_path())
            .collect();
        let mut audio_outputs: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut collided: HashSet<PathBuf> = HashSet::new();
        for source in sources.iter().filter(|s| s.kind == EntryKind::AudioFile) {
            let target = self.target_path(&source.relative_path, source.kind);
            let occupant = if source_dirs.contains(target.as_path()) {
                Some(target.clone())
            } else {
                audio_outputs.get(&target).cloned()
            };
            match occupant {
                Some(existing) => {
                    errors.push(DiscoveryError::Collision {
                        path: source.relative_path.clone(),
                        audio: existing,
                    });
                    collided.insert(source.relative_path.clone());
                }
                None => {
                    audio_outputs.insert(target, source.relative_path.clone());
                }
            }
        }

        let mut actions = Vec::with_capacity(sources.len());
        let mut blocking = Vec::new();
        let mut expected: HashSet<PathBuf> = HashSet::new();

        for source in sources {
            if collided.contains(&source.relative_path) {
                continue;
            }
            let target = self.target_path(&source.relative_path, source.kind);
            let existing = targets.get(&target);

            match source.kind {
                EntryKind::Directory => {
                    expected.insert(target.clone());
                    match existing {
                        Some(entry) if entry.is_dir => actions.push(Action::Skip { source, target }),
                        Some(entry) => {
                            blocking.push(entry.clone());
                            actions.push(Action::EnsureDirectory { source });
                        }
                        None => actions.push(Action::EnsureDirectory { source }),
                    }
                }
                EntryKind::OtherFile if audio_outputs.contains_key(&target) => {
                    errors.push(DiscoveryError::Collision {
                        path: source.relative_path.clone(),
                        audio: audio_outputs[&target].clone(),
                    });
                }
                EntryKind::AudioFile | EntryKind::OtherFile => {
                    expected.insert(target.clone());
                    let current = existing.map_or(false, |t| t.is_current_for(&source));
                    if let Some(entry) = existing.filter(|t| t.is_dir) {
                        blocking.push(entry.clone());
                    }
                    let action = if current {
                        Action::Skip { source, target }
                    } else if source.kind == EntryKind::AudioFile {
                        Action::Transcode { source, target }
                    } else {
                        Action::Copy { source, target }
                    };
                    actions.push(action);
                }
            }
        }

        // Blocking entries go before dispatch, taking their subtrees with
        // them; nothing under them is deleted again during cleaning.
        let blocked: Vec<&Path> = blocking.iter().map(|t| t.relative_path.as_path()).collect();
        let mut extraneous: Vec<TargetEntry> = targets
            .into_values()
            .filter(|t| !expected.contains(&t.relative_path))
            .filter(|t| !protected.iter().any(|p| t.relative_path.starts_with(p)))
            .filter(|t| !blocked.iter().any(|b| t.relative_path.starts_with(b)))
            .collect();
        extraneous.sort_by(|a, b| {
            a.is_dir.cmp(&b.is_dir).then_with(|| {
                b.relative_path
                    .components()
                    .count()
                    .cmp(&a.relative_path.components().count())
                    .then_with(|| a.relative_path.cmp(&b.relative_path))
            })
        });
        actions.extend(
            extraneous
                .into_iter()
                .map(|target| Action::DeleteExtraneous { target }),
        );

        for error in &errors {
            warn!("{}", error);
        }

        SyncPlan {
            actions,
            blocking,
            errors,
        }
    }

    /// Walk the source tree. Unreadable entries are recorded, never fatal.
    fn scan_source(
        &self,
        errors: &mut Vec<DiscoveryError>,
        protected: &mut Vec<PathBuf>,
    ) -> Vec<SourceEntry> {
        let mut entries = Vec::new();
        let mut walker = WalkDir::new(&self.source_root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| self.relative_to_source(p))
                        .unwrap_or_default();
                    self.protect(&path, protected);
                    errors.push(DiscoveryError::Unreadable {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let relative_path = self.relative_to_source(entry.path());
            if self.exclude.is_match(&relative_path) {
                debug!(path = %relative_path.display(), "Excluded");
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    self.protect(&relative_path, protected);
                    errors.push(DiscoveryError::Unreadable {
                        path: relative_path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else if self.decoder.accepts(&relative_path) {
                EntryKind::AudioFile
            } else {
                EntryKind::OtherFile
            };

            entries.push(SourceEntry {
                relative_path,
                kind,
                modified: FileTime::from_last_modification_time(&metadata),
                permissions: metadata.permissions(),
            });
        }

        entries
    }

    /// Walk the target tree without following links.
    fn scan_target(&self, protected: &mut Vec<PathBuf>) -> BTreeMap<PathBuf, TargetEntry> {
        let mut entries = BTreeMap::new();
        if !self.target_root.is_dir() {
            return entries;
        }

        for next in WalkDir::new(&self.target_root).min_depth(1) {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    // Unknown contents are left alone
                    let path = err
                        .path()
                        .and_then(|p| p.strip_prefix(&self.target_root).ok())
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    warn!("Cannot read target {}: {}", path.display(), err);
                    protected.push(path);
                    continue;
                }
            };

            let relative_path = match entry.path().strip_prefix(&self.target_root) {
                Ok(path) => path.to_path_buf(),
                Err(_) => continue,
            };
            if is_temp_path(&relative_path) {
                debug!(path = %relative_path.display(), "Found abandoned temp file");
            }
            let modified = entry
                .metadata()
                .ok()
                .map(|m| FileTime::from_last_modification_time(&m));

            entries.insert(
                relative_path.clone(),
                TargetEntry {
                    relative_path,
                    exists: true,
                    is_dir: entry.file_type().is_dir(),
                    modified,
                },
            );
        }

        entries
    }

    fn relative_to_source(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.source_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Keep an unreadable source path's possible outputs out of deletion.
    fn protect(&self, relative_path: &Path, protected: &mut Vec<PathBuf>) {
        protected.push(relative_path.to_path_buf());
        if self.decoder.accepts(relative_path) {
            protected.push(self.target_path(relative_path, EntryKind::AudioFile));
        }
    }
}
