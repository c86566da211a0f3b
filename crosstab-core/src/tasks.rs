//! Background worker pool for timer-driven and on-demand work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Number of background jobs allowed to run at once.
pub const BACKGROUND_WORKERS: usize = 4;

#[derive(Clone)]
pub struct Background {
    inner: Arc<Inner>,
}

struct Inner {
    /// Stops periodic timers
    timer: CancellationToken,
    /// Abandons in-flight work once the grace period runs out
    work: CancellationToken,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl Background {
    pub fn new(workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                timer: CancellationToken::new(),
                work: CancellationToken::new(),
                tracker: TaskTracker::new(),
                permits: Arc::new(Semaphore::new(workers.max(1))),
            }),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.tracker.is_closed()
    }

    /// Fire-and-forget. Returns false once shutdown has begun.
    pub fn spawn<F>(&self, task: &'static str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            debug!(task, "background pool closed, dropping task");
            return false;
        }
        let work = self.inner.work.clone();
        let permits = Arc::clone(&self.inner.permits);
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = work.cancelled() => debug!(task, "background task abandoned"),
                _ = async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    fut.await;
                } => {}
            }
        });
        true
    }

    /// Run `tick` every `period`, first run one period from now. Ticks that
    /// fall behind are skipped, not queued.
    pub fn spawn_periodic<F, Fut>(&self, task: &'static str, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return false;
        }
        let timer = self.inner.timer.clone();
        let work = self.inner.work.clone();
        self.inner.tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = timer.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    _ = work.cancelled() => break,
                    _ = tick() => {}
                }
            }
            debug!(task, "periodic task stopped");
        });
        true
    }

    /// Stop timers, refuse new work and wait up to `grace` for in-flight
    /// work. Returns false if work had to be abandoned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.timer.cancel();
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok()
        {
            return true;
        }
        warn!(
            pending = self.inner.tracker.len(),
            "background work did not finish within grace period, abandoning"
        );
        self.inner.work.cancel();
        false
    }
}

impl Default for Background {
    fn default() -> Self {
        Self::new(BACKGROUND_WORKERS)
    }
}
