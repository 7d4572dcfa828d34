use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// A stop request shared between the signal handler and the crawler.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    is_requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Creates a new `ShutdownSignal` wrapped in an [`Arc`].
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests the stop. Wakes every waiter once.
    pub fn request(&self) {
        if !self.is_requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether the stop was requested.
    pub fn is_requested(&self) -> bool {
        self.is_requested.load(Ordering::SeqCst)
    }

    /// Waits until the stop is requested. Returns at once if it already was.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}
