//! Cooperative cancellation for apply runs.
//!
//! A [`CancelSignal`] is a latched flag: once cancelled it stays cancelled.
//! Clones share the same flag, so the CLI can hand one clone to its Ctrl-C
//! handler and another to the executor.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared, latched cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when the signal fires.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of self, so this cannot fail.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_latched_and_shared() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());

        signal.cancel();
        signal.cancel();

        assert!(clone.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), clone.cancelled())
            .await
            .expect("cancelled() resolves after cancel");
    }

    #[tokio::test]
    async fn test_cancelled_waits_until_fired() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter wakes")
            .expect("task completes");
    }
}
