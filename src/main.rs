use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use pi_picture_frame::config_store::ConfigStore;
use pi_picture_frame::{FrameOptions, PictureFrame};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long a signalled shutdown waits for the frame to settle.
const SIGNAL_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    name = "picture-frame",
    version,
    about = "Unattended picture frame with a web control panel"
)]
struct Args {
    /// Path to the YAML settings file (created with defaults when missing)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "pi_picture_frame=debug,info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args { config, verbose } = Args::parse();
    init_tracing(verbose);

    let config_path = config.unwrap_or_else(ConfigStore::default_path);
    let frame = PictureFrame::init(FrameOptions::new(&config_path))
        .await
        .with_context(|| format!("failed to start frame with {}", config_path.display()))?;
    tracing::info!("Loaded configuration:\n{:#?}", frame.current_config());
    let frame = Arc::new(frame);
    let mut run = frame.run_async();

    tokio::select! {
        finished = &mut run => {
            let outcome = finished.context("frame task panicked")?;
            frame.dispose().await.context("failed to dispose frame")?;
            let reason = outcome.context("frame stopped with an error")?;
            tracing::info!(%reason, "frame finished");
            return Ok(());
        }
        () = shutdown_signal() => {
            tracing::info!("termination signal received; shutting down");
        }
    }

    let disposed = frame.dispose().await;
    match tokio::time::timeout(SIGNAL_EXIT_TIMEOUT, run).await {
        Ok(Ok(Ok(reason))) => tracing::info!(%reason, "frame stopped"),
        Ok(Ok(Err(err))) => tracing::warn!("frame stopped with error: {err}"),
        Ok(Err(err)) => tracing::warn!("frame task failed: {err}"),
        Err(_) => tracing::warn!("frame did not stop within {SIGNAL_EXIT_TIMEOUT:?}"),
    }
    disposed.context("failed to dispose frame")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler failed: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to register SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
