//! Shared logging setup for the harmonize binary.
//!
//! Console output goes to stderr without timestamps so progress lines read
//! like plain messages ("Transcoding ...", "Deleting ..."). An optional log
//! file receives the same events without ANSI colouring.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration for the harmonize binaries.
pub struct LogConfig<'a> {
    /// Crate/target name that receives the chosen level (e.g. "harmonize").
    pub app_name: &'a str,
    /// Only warnings and errors.
    pub quiet: bool,
    /// Debug output for the application target.
    pub verbose: bool,
    /// Append log events to this file in addition to stderr.
    pub log_file: Option<&'a Path>,
}

/// Initialize tracing with stderr output and an optional append-only log file.
///
/// `--quiet` and `--verbose` take precedence over `RUST_LOG`; otherwise
/// `RUST_LOG` is honoured and falls back to `<app>=info`.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let filter = build_filter(&config);

    let file_layer = match config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(build_filter(&config)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_level(config.verbose)
                .with_filter(filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

fn build_filter(config: &LogConfig<'_>) -> EnvFilter {
    if config.quiet || config.verbose {
        return EnvFilter::new(filter_directive(config.app_name, config.quiet, config.verbose));
    }
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.app_name, false, false)))
}

/// Filter directive for the requested verbosity. Quiet wins over verbose.
pub fn filter_directive(app_name: &str, quiet: bool, verbose: bool) -> String {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    format!("warn,{}={}", sanitize_target(app_name), level)
}

fn sanitize_target(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect()
}
