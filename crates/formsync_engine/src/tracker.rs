//! In-flight chain tracking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts the chains in flight for one form and lets new chains wait until
/// they have all settled.
#[derive(Debug, Clone, Default)]
pub struct ChainTracker {
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl ChainTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a chain. The returned guard must be held until it settles.
    pub fn enter(&self) -> ChainGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ChainGuard {
            in_flight: Arc::clone(&self.in_flight),
            settled: Arc::clone(&self.settled),
        }
    }

    /// Waits until no chain is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.settled.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns the number of chains in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Guard of an in-flight chain.
#[derive(Debug)]
pub struct ChainGuard {
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "chain tracker underflow");
        self.settled.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_tracker_does_not_wait() {
        let tracker = ChainTracker::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn waits_for_all_guards() {
        let tracker = ChainTracker::new();
        let first = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.in_flight(), 2);

        let waiter = tracker.clone();
        let task = tokio::spawn(async move { waiter.wait_idle().await });

        drop(first);
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }
}
