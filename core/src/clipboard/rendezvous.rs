//! One-shot wake used to end the render-on-demand wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    notify: Notify,
    raised: AtomicU64,
}

/// Binary wake signal with no queue: raising it twice before anyone waits
/// still wakes only one wait.
#[derive(Debug, Clone, Default)]
pub struct Rendezvous {
    inner: Arc<Inner>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.inner.raised.fetch_add(1, Ordering::AcqRel);
        self.inner.notify.notify_one();
    }

    /// Wait for the next (or a stored) raise.
    pub async fn wait(&self) {
        self.inner.notify.notified().await
    }

    /// Wait up to `timeout`; true if the signal fired.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// How many times the signal has been raised
    pub fn raised(&self) -> u64 {
        self.inner.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_wait_is_pending_until_raised() {
        let rendezvous = Rendezvous::new();
        let mut wait = task::spawn(rendezvous.wait());

        assert_pending!(wait.poll());
        rendezvous.raise();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_raises_collapse_into_one_wake() {
        let rendezvous = Rendezvous::new();
        rendezvous.raise();
        rendezvous.raise();
        assert_eq!(rendezvous.raised(), 2);

        let mut first = task::spawn(rendezvous.wait());
        assert_ready!(first.poll());

        let mut second = task::spawn(rendezvous.wait());
        assert_pending!(second.poll());
    }

    #[tokio::test]
    async fn test_wait_timeout_elapses() {
        let rendezvous = Rendezvous::new();
        assert!(!rendezvous.wait_timeout(Duration::from_millis(10)).await);

        let raiser = rendezvous.clone();
        tokio::spawn(async move { raiser.raise() });
        assert!(rendezvous.wait_timeout(Duration::from_secs(5)).await);
    }
}
