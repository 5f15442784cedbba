//! Metadata tag copying from source audio to the transcoded file.

use crate::error::TagError;
use lofty::config::WriteOptions;
use lofty::file::{TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::TagExt;
use std::path::Path;

/// Best-effort tag transfer. Failures are logged by the caller, never fatal.
pub trait TagCopier: Send + Sync {
    /// Copy descriptive tags from `source` onto `dest`, returning how many
    /// items were written.
    fn copy_tags(&self, source: &Path, dest: &Path) -> Result<usize, TagError>;
}

/// Tag copier backed by `lofty`: reads the source's primary tag (Vorbis
/// comments for FLAC), converts it to the destination's native tag format
/// (ID3v2 for MP3, Vorbis comments for Opus) and saves it in place.
///
/// Both files are identified by content, so `dest` may carry any name
/// (the staged temp path in particular).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagCopier;

fn read_by_content(path: &Path) -> Result<TaggedFile, TagError> {
    Ok(Probe::open(path)?.guess_file_type()?.read()?)
}

impl TagCopier for LoftyTagCopier {
    fn copy_tags(&self, source: &Path, dest: &Path) -> Result<usize, TagError> {
        let source_file = read_by_content(source)?;
        let Some(tag) = source_file
            .primary_tag()
            .or_else(|| source_file.first_tag())
            .filter(|tag| !tag.is_empty())
        else {
            return Ok(0);
        };

        let dest_file = read_by_content(dest)?;
        let mut tag = tag.clone();
        // Items with no equivalent in the destination format are dropped
        tag.re_map(dest_file.primary_tag_type());
        let count = tag.item_count() as usize;
        tag.save_to_path(dest, WriteOptions::default())?;
        Ok(count)
    }
}

/// Tag copier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTagCopier;

impl TagCopier for NoopTagCopier {
    fn copy_tags(&self, _source: &Path, _dest: &Path) -> Result<usize, TagError> {
        Ok(0)
    }
}
