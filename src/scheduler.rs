//! Periodic background loops.
//!
//! The feed fetch and the cleanup loop share this runner:
//! - wait one interval on the injected `Clock`
//! - run the job to completion
//! - repeat until the shutdown token is cancelled

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of wall-clock time and delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, shutdown: CancellationToken) -> Self {
        Self { clock, shutdown }
    }

    /// Run `job` once per `interval`, the first time after one full interval.
    ///
    /// Returns when the shutdown token fires. A job already running is allowed
    /// to finish; the loop exits before the next wait.
    pub async fn run_every<F, Fut>(&self, name: &str, interval: Duration, mut job: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        log::info!("{} scheduler started (every {:?})", name, interval);
        let mut runs = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep(interval) => {}
            }

            job().await;
            runs += 1;
        }

        log::info!("{} scheduler stopped after {} runs", name, runs);
        runs
    }
}
