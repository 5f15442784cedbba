//! harmonize command-line entry point
//!
//! Usage:
//!     harmonize [-n N] [--codec mp3|opus] SOURCE TARGET
//!
//! Exit codes: 0 when every file synced, 1 when some files failed,
//! 2 when the run could not start.

use anyhow::{Context, Result};
use clap::Parser;
use harmonize::{CancellationToken, CodecSet, SyncArgs, SyncDriver, SyncError};
use harmonize_logging::{init_logging, LogConfig};
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_FAILURES: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    let args = SyncArgs::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "harmonize",
        quiet: args.quiet,
        verbose: args.verbose,
        log_file: args.log_file.as_deref(),
    }) {
        eprintln!("{:?}", err);
        return ExitCode::from(EXIT_FATAL);
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURES),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Returns whether the run finished without failures.
fn run(args: SyncArgs) -> Result<bool> {
    let config = args.to_config().context("Invalid configuration")?;
    let cancel = CancellationToken::new();
    install_signal_handlers(&cancel)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let codecs = CodecSet::for_codec(config.codec);
    let driver = SyncDriver::new(&args.source, &args.target, config, codecs)
        .with_cancellation(cancel);

    let report = match runtime.block_on(driver.run()) {
        Ok(report) => report,
        Err(err @ SyncError::CodecUnavailable(_)) => {
            return Err(err).context("Cannot transcode audio");
        }
        Err(err) => return Err(err.into()),
    };

    for failure in report.failures() {
        if let harmonize::JobStatus::Failed(reason) = &failure.status {
            error!("Failed: {}: {}", failure.relative_path.display(), reason);
        }
    }
    for discovery in &report.errors {
        error!("Not synced: {}", discovery);
    }

    Ok(report.summary.is_success())
}

/// Turn SIGINT/SIGTERM (Ctrl+C on Windows) into a cancellation request.
fn install_signal_handlers(cancel: &CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handler")?;
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, stopping...", sig);
                cancel.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, stopping...");
            cancel.cancel();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}
