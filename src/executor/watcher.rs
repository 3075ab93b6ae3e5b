//! Run-wide interruption flag

use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation token shared by everything taking part in one run.
///
/// Starts out not interrupted and flips exactly once. Clones share state.
#[derive(Clone, Debug)]
pub struct TestWatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    is_watch_mode: bool,
    interrupted: watch::Sender<bool>,
}

impl TestWatcher {
    pub fn new(is_watch_mode: bool) -> Self {
        let (interrupted, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                is_watch_mode,
                interrupted,
            }),
        }
    }

    pub fn is_watch_mode(&self) -> bool {
        self.inner.is_watch_mode
    }

    pub fn is_interrupted(&self) -> bool {
        *self.inner.interrupted.borrow()
    }

    /// Flip to interrupted. Further calls are no-ops.
    pub fn set_interrupted(&self) {
        self.inner.interrupted.send_if_modified(|state| {
            let changed = !*state;
            *state = true;
            changed
        });
    }

    /// Resolves once the token is interrupted
    pub async fn interrupted(&self) {
        let mut rx = self.inner.interrupted.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|interrupted| *interrupted).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_not_interrupted() {
        let watcher = TestWatcher::new(true);
        assert!(watcher.is_watch_mode());
        assert!(!watcher.is_interrupted());
    }

    #[test]
    fn test_interrupt_is_one_way_and_shared() {
        let watcher = TestWatcher::new(false);
        let clone = watcher.clone();

        clone.set_interrupted();
        clone.set_interrupted();
        assert!(watcher.is_interrupted());
        assert!(!watcher.is_watch_mode());
    }

    #[tokio::test]
    async fn test_interrupted_future_resolves() {
        let watcher = TestWatcher::new(false);
        let waiter = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.interrupted().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        watcher.set_interrupted();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_future_after_flip() {
        let watcher = TestWatcher::new(false);
        watcher.set_interrupted();
        tokio::time::timeout(Duration::from_secs(1), watcher.interrupted())
            .await
            .unwrap();
    }
}
