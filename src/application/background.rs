//! Bounded pool for fire-and-forget work.
//!
//! Tasks are spawned immediately and queue on a semaphore, so callers never
//! wait. A failing task is logged and dropped; nothing reaches the caller.

use std::{future::Future, sync::Arc};

use metrics::counter;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const SOURCE: &str = "marketplace::application::background";

#[derive(Clone)]
pub struct BackgroundPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl BackgroundPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn `task` under the concurrency limit.
    pub fn spawn<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match task.await {
                Ok(()) => debug!(target = SOURCE, task = name, "background task finished"),
                Err(err) => {
                    counter!("marketplace_background_failures_total", "task" => name).increment(1);
                    warn!(target = SOURCE, task = name, error = %err, "background task failed");
                }
            }
        });
    }

    /// Number of tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task spawned so far. The pool stays usable afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
