use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Wakes a background loop early, optionally asking it to act immediately.
///
/// A plain [`wake`](Self::wake) makes the loop re-read its settings and start
/// a fresh wait; [`request_advance`](Self::request_advance) makes it act now.
/// Requests made while the loop is busy are kept for its next wait.
#[derive(Debug, Default)]
pub struct LoopSignal {
    notify: Notify,
    advance: AtomicBool,
}

impl LoopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn request_advance(&self) {
        self.advance.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Consumes a pending advance request.
    pub fn take_advance(&self) -> bool {
        self.advance.swap(false, Ordering::SeqCst)
    }
}
