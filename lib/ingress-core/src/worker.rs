//! Fixed-size worker pool draining the work queue

use crate::config::Config;
use crate::error::SyncError;
use crate::key::ReconcileKey;
use crate::queue::WorkQueue;
use crate::sync::SyncHandler;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RunError {
    #[error("cancelled while waiting for caches to sync")]
    CacheSync,
}

/// Workers pulling keys from a shared queue and running the sync handler
#[derive(Clone)]
pub struct WorkerPool {
    queue: WorkQueue<ReconcileKey>,
    handler: Arc<SyncHandler>,
    config: Arc<Config>,
}

impl WorkerPool {
    pub fn new(queue: WorkQueue<ReconcileKey>, handler: Arc<SyncHandler>, config: Arc<Config>) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Wait for the caches, start the workers and run until `cancel` fires.
    /// In-flight syncs finish before this returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RunError> {
        info!("Waiting for informer caches to sync");
        if !self.wait_for_sync(&cancel).await {
            self.queue.shut_down();
            return Err(RunError::CacheSync);
        }

        info!("Starting {} workers", self.config.worker_count);
        let workers: Vec<_> = (0..self.config.worker_count)
            .map(|id| {
                let pool = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.run_worker(id, cancel).await })
            })
            .collect();
        info!("Started workers");

        cancel.cancelled().await;
        info!("Shutting down workers");
        self.queue.shut_down();

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Workers stopped");
        Ok(())
    }

    async fn wait_for_sync(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.handler.has_synced() {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
            }
        }
    }

    async fn run_worker(&self, id: usize, cancel: CancellationToken) {
        debug!(worker = id, "Worker started");
        while !cancel.is_cancelled() {
            let Some(key) = self.queue.get().await else {
                break;
            };
            self.process(&key).await;
        }
        debug!(worker = id, "Worker stopped");
    }

    /// Run one sync and decide between forget, requeue and drop.
    async fn process(&self, key: &ReconcileKey) {
        let timeout = self.config.sync_timeout;
        let result = AssertUnwindSafe(tokio::time::timeout(timeout, self.handler.sync(key)))
            .catch_unwind()
            .await;

        let result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(SyncError::Timeout(timeout)),
            Err(panic) => Err(SyncError::Panicked(panic_message(panic.as_ref()))),
        };

        match result {
            Ok(outcome) => {
                self.queue.forget(key);
                info!(%key, ?outcome, "Successfully synced");
            }
            Err(e) if e.is_retryable() => {
                let attempts = self.queue.num_requeues(key);
                if self.config.max_retries > 0 && attempts >= self.config.max_retries {
                    error!(%key, error = %e, attempts, "Dropping key after too many retries");
                    self.queue.forget(key);
                } else {
                    warn!(%key, error = %e, attempt = attempts + 1, "Error syncing, requeueing");
                    self.queue.add_rate_limited(key.clone());
                }
            }
            Err(e) => {
                error!(%key, error = %e, "Dropping key after terminal error");
                self.queue.forget(key);
            }
        }

        self.queue.done(key);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
