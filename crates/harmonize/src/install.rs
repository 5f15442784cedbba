//! Atomic install of job output
//!
//! Output is written to a temp file next to its final path and renamed into
//! place once complete. The temp name starts with a dot, keeps the final file
//! name for attribution and ends with [`TEMP_SUFFIX`], so it can never equal a
//! real output name and interrupted runs leave artifacts the next run deletes
//! as extraneous.

use crate::types::SourceEntry;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Reserved suffix of in-progress output files.
pub const TEMP_SUFFIX: &str = ".harmonize-tmp";

/// True if `path` names an in-progress (or abandoned) output file.
pub fn is_temp_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

/// Output staged next to its final path. Dropping it removes the temp file.
#[derive(Debug)]
pub struct StagedFile {
    temp: TempPath,
    final_path: PathBuf,
}

impl StagedFile {
    /// Create an empty temp file in the same directory as `final_path`.
    pub fn create(final_path: &Path) -> io::Result<Self> {
        let dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?
            .into_temp_path();

        Ok(Self {
            temp,
            final_path: final_path.to_path_buf(),
        })
    }

    /// Path writers should fill.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    /// Apply the source's captured mtime and permission bits.
    ///
    /// mtime goes first so a read-only source mode cannot block it.
    pub fn stamp(&self, source: &SourceEntry) -> io::Result<()> {
        let atime = fs::metadata(self.path())
            .map(|meta| FileTime::from_last_access_time(&meta))
            .unwrap_or(source.modified);
        filetime::set_file_times(self.path(), atime, source.modified)?;
        fs::set_permissions(self.path(), source.permissions.clone())?;
        Ok(())
    }

    /// Rename over the final path. This is the only publish point.
    pub fn publish(self) -> io::Result<PathBuf> {
        let StagedFile { temp, final_path } = self;
        temp.persist(&final_path).map_err(|e| e.error)?;
        Ok(final_path)
    }
}
