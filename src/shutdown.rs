//! Cooperative cancellation shared by the long-running tasks.
//!
//! A [`ShutdownController`] owns a `watch` channel carrying a single flag. Tasks hold
//! a cloned [`ShutdownSignal`] and check it once per iteration; waits go through
//! [`ShutdownSignal::sleep`] so a pending request cuts them short.

use std::time::Duration;
use tokio::sync::watch;

/// Sending side of the shutdown flag.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    /// Controller with shutdown not yet requested.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A new receiver for this controller.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Ask every task holding a signal to stop. Idempotent.
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested, or the controller was dropped.
    pub async fn requested(&mut self) {
        // A dropped controller can never request shutdown, so treat it as one.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.requested() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_request() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();
        assert!(signal.sleep(Duration::from_secs(1)).await);
        assert!(!signal.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_interrupts_sleep() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();

        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.request();

        assert!(!sleeper.await.unwrap());
        assert!(controller.is_requested());
    }

    #[tokio::test]
    async fn test_dropped_controller_counts_as_request() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();
        drop(controller);
        signal.requested().await;
    }
}
