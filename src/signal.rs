//! Reusable "proceed" signal between the control context and the scan worker.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Binary event set by `next()`/`stop()` and awaited between tiles.
///
/// The worker clears the signal before it starts waiting, so a `next()` issued
/// during a tile's sweep does not skip the following pause.
#[derive(Debug, Default)]
pub struct ProceedSignal {
    set: AtomicBool,
    notify: Notify,
}

impl ProceedSignal {
    /// Unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake any waiter.
    pub fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Reset to unset.
    pub fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    /// True until cleared.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Wait until the signal is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent set() is not lost
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
