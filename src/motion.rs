//! Waiting for stage motion to finish.
//!
//! The stage offers no usable in-position status, so motion completion is a
//! fixed time budget. [`MotionWait`] keeps that decision in one place; a
//! closed-loop implementation could poll the device instead.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of an interruptible wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full budget elapsed
    Completed,
    /// The run was cancelled first
    Cancelled,
}

/// Wait for a motion of known duration, observing cancellation.
#[async_trait]
pub trait MotionWait: Send + Sync {
    /// Wait `duration`, returning early once `cancel` fires.
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome;
}

/// Sleeps in `poll_interval` slices, checking the token between slices.
#[derive(Debug, Clone, Copy)]
pub struct TimedMotionWait {
    poll_interval: Duration,
}

impl TimedMotionWait {
    /// Wait slicing sleeps into `poll_interval` steps (at least 1 ms).
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }
}

impl Default for TimedMotionWait {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl MotionWait for TimedMotionWait {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
        debug!(seconds = duration.as_secs_f64(), "Waiting for motion");
        let deadline = Instant::now() + duration;

        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Completed;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
