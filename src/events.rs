use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Why the frame stopped waiting for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QuitReason {
    #[default]
    None,
    Disposed,
    Restarting,
    ShuttingDown,
    ExitToDesktop,
    FatalError,
}

impl fmt::Display for QuitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QuitReason::None => "none",
            QuitReason::Disposed => "disposed",
            QuitReason::Restarting => "restarting",
            QuitReason::ShuttingDown => "shutting-down",
            QuitReason::ExitToDesktop => "exit-to-desktop",
            QuitReason::FatalError => "fatal-error",
        };
        f.write_str(label)
    }
}

/// Set-once quit slot shared by the control server and the orchestrator.
///
/// The first non-`None` reason posted wins; later posts are ignored.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    tx: Arc<watch::Sender<QuitReason>>,
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl QuitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(QuitReason::None);
        Self { tx: Arc::new(tx) }
    }

    /// Records `reason` if nothing has been recorded yet. Returns whether it was stored.
    pub fn post(&self, reason: QuitReason) -> bool {
        if reason == QuitReason::None {
            return false;
        }
        self.tx.send_if_modified(|current| {
            if *current == QuitReason::None {
                *current = reason;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> QuitReason {
        *self.tx.borrow()
    }

    pub fn is_set(&self) -> bool {
        self.current() != QuitReason::None
    }

    /// Resolves once a reason has been posted, immediately if one already was.
    pub async fn wait(&self) -> QuitReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|reason| *reason != QuitReason::None).await {
            Ok(reason) => *reason,
            Err(_) => self.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_reason_wins() {
        let signal = QuitSignal::new();
        assert!(signal.post(QuitReason::Restarting));
        assert!(!signal.post(QuitReason::ShuttingDown));
        assert!(!signal.post(QuitReason::Disposed));
        assert_eq!(signal.current(), QuitReason::Restarting);
    }

    #[test]
    fn none_is_never_recorded() {
        let signal = QuitSignal::new();
        assert!(!signal.post(QuitReason::None));
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let signal = QuitSignal::new();
        signal.post(QuitReason::ExitToDesktop);
        let reason = tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
        assert_eq!(reason, QuitReason::ExitToDesktop);
    }

    #[tokio::test]
    async fn waiter_wakes_on_post_from_another_task() {
        let signal = QuitSignal::new();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait().await }
        });
        tokio::task::yield_now().await;
        signal.post(QuitReason::ShuttingDown);
        assert_eq!(waiter.await.unwrap(), QuitReason::ShuttingDown);
    }

    #[tokio::test]
    async fn concurrent_posts_keep_a_single_reason() {
        let signal = QuitSignal::new();
        let reasons = [
            QuitReason::Restarting,
            QuitReason::ShuttingDown,
            QuitReason::ExitToDesktop,
            QuitReason::Disposed,
        ];
        let mut handles = Vec::new();
        for reason in reasons {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.post(reason) }));
        }
        let mut stored = 0;
        for handle in handles {
            if handle.await.unwrap() {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert!(reasons.contains(&signal.current()));
    }
}
