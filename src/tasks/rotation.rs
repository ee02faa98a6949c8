use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::signal::LoopSignal;
use crate::render::Renderer;

/// Advances the renderer every `interval()` until `cancel` fires.
///
/// `interval` is read again before every wait, so a configuration change
/// followed by [`LoopSignal::wake`] takes effect immediately. Cancellation
/// always wins over a pending advance.
pub async fn run<F>(
    renderer: Arc<dyn Renderer>,
    signal: Arc<LoopSignal>,
    cancel: CancellationToken,
    interval: F,
) where
    F: Fn() -> Duration + Send,
{
    info!("photo rotation started");
    loop {
        let wait = interval();
        let advance = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = signal.notified() => signal.take_advance(),
            _ = sleep(wait) => true,
        };
        if cancel.is_cancelled() {
            break;
        }
        if !advance {
            debug!(interval = ?interval(), "rotation interval changed; restarting wait");
            continue;
        }

        match renderer.go_to_next_picture() {
            Ok(()) => debug!(picture = ?renderer.current_picture_path(), "advanced picture"),
            Err(err) => warn!(error = ?err, "failed to advance picture"),
        }
    }
    info!("photo rotation stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRenderer {
        advances: AtomicUsize,
    }

    impl Renderer for CountingRenderer {
        fn init(&self, _: &Path) -> Result<()> {
            Ok(())
        }
        fn go_to_next_picture(&self) -> Result<()> {
            self.advances.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn current_picture_path(&self) -> Option<PathBuf> {
            None
        }
        fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        renderer: Arc<CountingRenderer>,
        signal: Arc<LoopSignal>,
        cancel: CancellationToken,
        interval: Arc<Mutex<Duration>>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start(every: Duration) -> Self {
            let renderer = Arc::new(CountingRenderer::default());
            let signal = Arc::new(LoopSignal::new());
            let cancel = CancellationToken::new();
            let interval = Arc::new(Mutex::new(every));
            let task = tokio::spawn(run(
                renderer.clone(),
                signal.clone(),
                cancel.clone(),
                {
                    let interval = interval.clone();
                    move || *interval.lock().unwrap()
                },
            ));
            Self {
                renderer,
                signal,
                cancel,
                interval,
                task,
            }
        }

        fn advances(&self) -> usize {
            self.renderer.advances.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn advances_once_per_interval() {
        let h = Harness::start(Duration::from_secs(60));
        sleep(Duration::from_secs(59)).await;
        assert_eq!(h.advances(), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.advances(), 1);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.advances(), 2);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn advance_request_is_immediate() {
        let h = Harness::start(Duration::from_secs(3600));
        tokio::task::yield_now().await;
        h.signal.request_advance();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.advances(), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_restarts_wait_without_advancing() {
        let h = Harness::start(Duration::from_secs(3600));
        sleep(Duration::from_secs(5)).await;
        *h.interval.lock().unwrap() = Duration::from_secs(10);
        h.signal.wake();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.advances(), 0);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.advances(), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_beats_pending_advance() {
        let h = Harness::start(Duration::from_secs(3600));
        h.signal.request_advance();
        h.cancel.cancel();
        h.task.await.unwrap();
        assert_eq!(h.renderer.advances.load(Ordering::SeqCst), 0);
    }
}
