//! CLI entry point for Gondola
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use clap::Parser;
use gondola::{Config, Daemon};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Gondola - watches drop folders and converts media into an HLS library
#[derive(Parser, Debug)]
#[command(name = "gondola")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "~/.gondola.toml")]
    config: String,

    /// Process whatever is waiting, then exit instead of watching
    #[arg(long, default_value = "false")]
    once: bool,

    /// Skip startup checks (ffmpeg, ffprobe, lsof). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = PathBuf::from(shellexpand::tilde(&args.config).into_owned());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(config.log_file.as_deref()) {
        eprintln!("Failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(config = %config_path.display(), "Gondola starting");

    let daemon = match Daemon::with_config(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = daemon.startup_checks().await {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = daemon.prepare() {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    if args.once {
        daemon.run_once().await;
        return ExitCode::SUCCESS;
    }

    match daemon.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Daemon error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Console output always; the configured log file is appended to as well.
fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}
