//! smb-walker - Concurrent share walker and reader
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use smb_walker::config::{CliArgs, WalkConfig};
use smb_walker::progress::{print_header, print_summary, ProgressReporter};
use smb_walker::smb::LocalShare;
use smb_walker::walker::WalkCoordinator;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the progress line is refreshed
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every job succeeded
fn run() -> Result<bool> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = WalkConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.url.to_display_string(),
            config.session_count,
            config.max_in_flight,
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_walk(config))
}

async fn run_walk(config: WalkConfig) -> Result<bool> {
    let connector = Arc::new(LocalShare::from_mounts(&config.url, &config.mounts));
    let coordinator = WalkCoordinator::new(config.clone(), connector);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = config.show_progress.then(|| Arc::new(ProgressReporter::new()));
    let ticker_stop = Arc::new(AtomicBool::new(false));

    let ticker = progress.as_ref().map(|reporter| {
        reporter.set_status("Opening sessions...");
        let reporter = Arc::clone(reporter);
        let stats = coordinator.stats();
        let stop = Arc::clone(&ticker_stop);
        let sessions = config.session_count;
        let started = Instant::now();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            while !stop.load(Ordering::Relaxed) {
                interval.tick().await;
                reporter.update(&stats.progress(sessions, started.elapsed()));
            }
        })
    });

    let outcome = coordinator.run().await;

    ticker_stop.store(true, Ordering::SeqCst);
    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            warn!(error = %e, "Progress task failed");
        }
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if let Some(reporter) = &progress {
                reporter.finish_and_clear();
            }
            return Err(e).context("Walk failed");
        }
    };

    if let Some(reporter) = &progress {
        if result.completed {
            reporter.finish("Walk completed");
        } else {
            reporter.finish("Walk interrupted");
        }
    }

    if config.show_progress {
        print_summary(&result);
    }

    if !result.completed {
        info!("Walk was interrupted before completion");
    }

    let failed = result.summary.failed();
    if failed > 0 {
        warn!(failures = failed, "Walk completed with failures");
    }

    Ok(result.summary.all_succeeded())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("smb_walker=debug,warn")
    } else {
        EnvFilter::new("smb_walker=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
