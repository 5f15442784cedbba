//! harmonize: keep a transcoded mirror of a music library.
//!
//! Lossless audio under the source root is transcoded to a lossy format in the
//! target root, every other file is copied verbatim, and target files with no
//! source counterpart are deleted. Runs are incremental: only files whose
//! source mtime is newer than the target's are redone.

pub mod cancel;
pub mod codec;
pub mod config;
pub mod differ;
pub mod driver;
pub mod error;
pub mod install;
pub mod jobs;
pub mod pipe;
pub mod pool;
pub mod tags;
pub mod types;

pub use cancel::CancellationToken;
pub use codec::CodecSet;
pub use config::{Codec, PipeConfig, SyncConfig};
pub use differ::{SyncPlan, TreeDiffer};
pub use driver::{SyncDriver, SyncReport, SyncState};
pub use error::{Result, SyncError};
pub use pool::WorkerPool;
pub use types::{Action, ActionKind, JobResult, JobStatus, SyncSummary};

use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(
    name = "harmonize",
    version,
    about = "Create and synchronize transcoded copies of audio folders"
)]
pub struct SyncArgs {
    /// Directory to read from
    pub source: PathBuf,

    /// Directory to write the mirror into (created if missing)
    pub target: PathBuf,

    /// Number of concurrent jobs [default: 1]
    #[arg(short = 'n', long, env = "HARMONIZE_NUM_PROCESSES")]
    pub num_processes: Option<usize>,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Print debug output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Output format for transcoded audio [default: mp3]
    #[arg(long, value_enum)]
    pub codec: Option<Codec>,

    /// Encoder quality: LAME VBR level for mp3, bitrate in kbit/s for opus
    #[arg(long)]
    pub quality: Option<String>,

    /// Glob pattern (relative to source) to leave out; may be repeated
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// TOML file with default settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show what would be done without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Also append log output to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl SyncArgs {
    /// Settings file (if any) overridden by command-line flags.
    pub fn to_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };

        if let Some(n) = self.num_processes {
            config.num_processes = n;
        }
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if let Some(quality) = &self.quality {
            config.quality = Some(quality.clone());
        }
        config.exclude.extend(self.exclude.iter().cloned());
        config.dry_run |= self.dry_run;

        config.validate()?;
        Ok(config)
    }
}
