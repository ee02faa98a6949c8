use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::signal::LoopSignal;
use crate::library::PictureSource;

/// Rescans the picture directory every refresh interval until `cancel` fires.
///
/// `settings` yields the directory and interval before every wait. A zero
/// interval disables periodic rescans; the loop then only reacts to the signal.
pub async fn run<F>(
    source: Arc<dyn PictureSource>,
    signal: Arc<LoopSignal>,
    cancel: CancellationToken,
    settings: F,
) where
    F: Fn() -> (PathBuf, Duration) + Send,
{
    info!("picture refresh started");
    loop {
        let (directory, every) = settings();
        let rescan = if every.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = signal.notified() => signal.take_advance(),
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = signal.notified() => signal.take_advance(),
                _ = sleep(every) => true,
            }
        };
        if cancel.is_cancelled() {
            break;
        }
        if !rescan {
            debug!("refresh settings changed; restarting wait");
            continue;
        }

        let scan = {
            let source = Arc::clone(&source);
            let directory = directory.clone();
            tokio::task::spawn_blocking(move || source.reload(&directory))
        };
        match scan.await {
            Ok(Ok(count)) => info!(count, directory = %directory.display(), "picture list refreshed"),
            Ok(Err(err)) => warn!(error = ?err, directory = %directory.display(), "picture refresh failed"),
            Err(err) => error!(error = %err, "picture refresh task failed"),
        }
    }
    info!("picture refresh stopped");
}
