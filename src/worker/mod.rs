pub mod cleanup;
pub mod download;
pub mod executor;

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owns every detached background task (downloads) so shutdown can find them.
///
/// Tasks get a child of the registry's cancellation token. On shutdown the
/// registry stops accepting work, waits out the grace period, then cancels
/// whatever is still running.
#[derive(Clone)]
pub struct TaskRegistry {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token a task should watch to stop early.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    pub fn spawn<F>(&self, name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        log::debug!("Spawning background task {}", name);
        self.tracker.spawn(task);
    }

    /// Close the registry and wait for tasks to drain.
    ///
    /// Returns `true` if everything finished inside `grace`. Otherwise the
    /// remaining tasks are cancelled and awaited, and `false` is returned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            log::info!("Waiting up to {:?} for {} background tasks", grace, pending);
        }

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return true;
        }

        log::warn!(
            "{} background tasks still running after {:?}, cancelling",
            self.tracker.len(),
            grace
        );
        self.cancel.cancel();
        self.tracker.wait().await;
        false
    }

    /// Wait until every task spawned so far has finished, then accept work again.
    #[cfg(test)]
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_waits_for_finished_tasks() {
        let registry = TaskRegistry::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        registry.spawn("quick", async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(registry.shutdown(Duration::from_secs(5)).await);
        assert!(done.load(Ordering::SeqCst));
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_stragglers_after_grace() {
        let registry = TaskRegistry::new();
        let token = registry.cancel_token();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        registry.spawn("stuck", async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!registry.shutdown(Duration::from_millis(20)).await);
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(registry.active(), 0);
    }
}
