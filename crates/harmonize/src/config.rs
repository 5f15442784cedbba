//! Configuration for a sync run
//!
//! Values come from an optional TOML file and are overridden by CLI flags.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bytes per Stream Pipe chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of chunks the Stream Pipe may hold in flight.
pub const DEFAULT_PIPE_CAPACITY: usize = 8;

/// Lossy output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Mp3,
    Opus,
}

impl Codec {
    /// Quality setting used when none is configured.
    ///
    /// MP3 uses a LAME VBR level (`-V 0`), Opus a target bitrate in kbit/s.
    pub fn default_quality(self) -> &'static str {
        match self {
            Codec::Mp3 => "0",
            Codec::Opus => "128",
        }
    }
}

/// Buffering used between decoder and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_pipe_capacity")]
    pub capacity: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            capacity: default_pipe_capacity(),
        }
    }
}

/// Main configuration for a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of concurrent jobs
    #[serde(default = "default_num_processes")]
    pub num_processes: usize,

    /// Output codec for transcoded audio
    #[serde(default)]
    pub codec: Codec,

    /// Encoder quality; codec default when unset
    #[serde(default)]
    pub quality: Option<String>,

    /// Glob patterns (relative to the source root) to leave out of the mirror
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Plan only, touch nothing
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub pipe: PipeConfig,
}

fn default_num_processes() -> usize {
    1
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            num_processes: default_num_processes(),
            codec: Codec::default(),
            quality: None,
            exclude: Vec::new(),
            dry_run: false,
            pipe: PipeConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_processes == 0 {
            return Err(SyncError::Config(
                "num_processes must be at least 1".to_string(),
            ));
        }
        if self.pipe.chunk_size == 0 || self.pipe.capacity == 0 {
            return Err(SyncError::Config(
                "pipe chunk_size and capacity must be at least 1".to_string(),
            ));
        }
        if let Some(quality) = &self.quality {
            if quality.trim().is_empty() {
                return Err(SyncError::Config("quality must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Effective encoder quality.
    pub fn quality(&self) -> &str {
        self.quality
            .as_deref()
            .unwrap_or_else(|| self.codec.default_quality())
    }
}
