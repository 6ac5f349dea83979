//! Fixed-size consumer pool draining the Persistent Queue (§4.7).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::bus::EventBus;
use crate::model::{Event, JobLogEntry, JobStatus, QueuedJob};
use crate::queue::{PersistentQueue, QueueError};
use crate::store::{JobLogStore, JobStore};
use crate::workers::{WorkerContext, WorkerRegistry};

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Fixed number of concurrent consumers (default 4).
    pub size: usize,
    /// How long a `receive` call blocks waiting for a message.
    pub poll_timeout: Duration,
    /// The queue's visibility timeout; a worker's execution deadline is
    /// this minus `deadline_margin` (§5 "visibility timeout vs worker
    /// deadline").
    pub visibility_timeout: Duration,
    pub deadline_margin: Duration,
    /// How long graceful shutdown waits for in-flight work before leaving
    /// it for visibility to re-expose.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            poll_timeout: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(30),
            deadline_margin: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl WorkerPoolConfig {
    fn deadline(&self) -> Duration {
        self.visibility_timeout.saturating_sub(self.deadline_margin)
    }
}

/// Fixed pool of N concurrent consumers (§4.7).
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn PersistentQueue>,
    stopping: Arc<AtomicBool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn(
        config: WorkerPoolConfig,
        queue: Arc<dyn PersistentQueue>,
        registry: Arc<WorkerRegistry>,
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let stopping = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(config.size);

        for worker_index in 0..config.size {
            let queue = queue.clone();
            let registry = registry.clone();
            let job_store = job_store.clone();
            let log_store = log_store.clone();
            let bus = bus.clone();
            let stopping = stopping.clone();
            let config = config;

            handles.push(tokio::spawn(async move {
                let ctx = WorkerContext::new(job_store.clone(), log_store.clone(), queue.clone(), bus.clone());
                loop {
                    if stopping.load(Ordering::Acquire) {
                        return;
                    }
                    match queue.receive(config.poll_timeout).await {
                        Ok(Some((message, token))) => {
                            let span = tracing::info_span!(
                                "worker.receive",
                                worker_index,
                                message_id = %message.id,
                                job_id = %message.job_id,
                                receive_count = message.receive_count
                            );
                            handle_message(&config, &queue, &registry, &job_store, &log_store, &bus, &ctx, message, token)
                                .instrument(span)
                                .await;
                        }
                        Ok(None) => continue,
                        Err(QueueError::Closed) => return,
                        Err(err) => {
                            error!(error = %err, "worker pool receive failed");
                        }
                    }
                }
            }));
        }

        info!(size = config.size, "worker pool started");
        Arc::new(Self {
            config,
            queue,
            stopping,
            handles: parking_lot::Mutex::new(handles),
        })
    }

    /// Stop taking new receives and wait up to `shutdown_grace` for
    /// in-flight work; anything still running is left for visibility to
    /// re-expose on next start (§4.7 Graceful shutdown).
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.handles.lock());
        let join_all = futures::future::join_all(handles);
        if tokio::time::timeout(self.config.shutdown_grace, join_all).await.is_err() {
            warn!("worker pool shutdown grace period elapsed with tasks still running");
        }
        if let Err(err) = self.queue.close().await {
            warn!(error = %err, "queue close failed during worker pool shutdown");
        }
    }
}

async fn handle_message(
    config: &WorkerPoolConfig,
    queue: &Arc<dyn PersistentQueue>,
    registry: &Arc<WorkerRegistry>,
    job_store: &Arc<dyn JobStore>,
    log_store: &Arc<dyn JobLogStore>,
    bus: &Arc<EventBus>,
    ctx: &WorkerContext,
    message: crate::model::QueueMessage,
    token: crate::model::AckToken,
) {
    let job = message.body;

    if let Ok(view) = log_store.roll_up(job.id).await {
        if view.status == JobStatus::Cancelled {
            let _ = queue.delete(token).await;
            bus.publish(Event::new(
                "job.status_change",
                serde_json::json!({ "job_id": job.id, "parent_id": job.parent_id, "status": "cancelled" }),
            ));
            return;
        }
    }

    let worker = match registry.route(&job.job_type) {
        Ok(worker) => worker,
        Err(_) => {
            error!(job_id = %job.id, job_type = %job.job_type, "no worker registered for step type");
            let _ = queue.delete(token).await;
            fail_job(job_store, log_store, bus, &job, "no_worker").await;
            return;
        }
    };

    let execution = AssertUnwindSafe(worker.execute(&job, ctx)).catch_unwind();
    let outcome = tokio::time::timeout(config.deadline(), execution).await;

    match outcome {
        Ok(Ok(Ok(()))) => {
            if let Err(err) = queue.delete(token).await {
                warn!(job_id = %job.id, error = %err, "failed to delete message after successful execute");
            }
        }
        Ok(Ok(Err(err))) if err.is_retryable() => {
            warn!(job_id = %job.id, error = %err, "worker reported retryable error, leaving message for redelivery");
        }
        Ok(Ok(Err(err))) => {
            let _ = queue.delete(token).await;
            fail_job(job_store, log_store, bus, &job, &err.to_string()).await;
        }
        Ok(Err(_panic)) => {
            error!(job_id = %job.id, "worker panicked during execute");
            let _ = queue.delete(token).await;
            fail_job(job_store, log_store, bus, &job, "worker_panicked").await;
        }
        Err(_elapsed) => {
            warn!(job_id = %job.id, "worker exceeded its execution deadline, leaving message for redelivery");
        }
    }
}

async fn fail_job(
    job_store: &Arc<dyn JobStore>,
    log_store: &Arc<dyn JobLogStore>,
    bus: &Arc<EventBus>,
    job: &QueuedJob,
    reason: &str,
) {
    let Ok(seq) = log_store.next_sequence(job.id).await else {
        return;
    };
    let _ = log_store
        .append(JobLogEntry::status_change_with_reason(
            job.id,
            seq,
            JobStatus::Failed,
            reason,
        ))
        .await;
    let _ = job_store.note_status(job.id, JobStatus::Failed, Utc::now()).await;
    bus.publish(Event::new(
        "job.status_change",
        serde_json::json!({ "job_id": job.id, "parent_id": job.parent_id, "status": "failed", "reason": reason }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueue, QueueConfig};
    use crate::store::{InMemoryJobLogStore, InMemoryJobStore};
    use crate::workers::builtin;
    use std::collections::HashMap;

    #[tokio::test]
    async fn pool_routes_unknown_step_type_to_failure() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let queue = InMemoryQueue::new(QueueConfig::default(), store.clone(), logs.clone());
        let bus = EventBus::new(Default::default());
        let registry = Arc::new(WorkerRegistry::new());

        let job = QueuedJob::root("mystery", "root job");
        store.create(job.clone()).await.unwrap();
        queue.enqueue(job.clone()).await.unwrap();

        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                poll_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            queue.clone(),
            registry,
            store.clone(),
            logs.clone(),
            bus,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown().await;

        let view = logs.roll_up(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("no_worker"));
    }

    #[tokio::test]
    async fn pool_completes_a_single_child_job() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let queue = InMemoryQueue::new(QueueConfig::default(), store.clone(), logs.clone());
        let bus = EventBus::new(Default::default());
        let mut registry = WorkerRegistry::new();
        registry.register(builtin::SingleChildWorker::new("agent", &[])).unwrap();
        let registry = Arc::new(registry);

        let root = QueuedJob::root("parent", "root");
        store.create(root.clone()).await.unwrap();
        let child = QueuedJob::child(&root, "agent", "a", HashMap::new());
        store.create_child(root.id, child.clone()).await.unwrap();
        queue.enqueue(child.clone()).await.unwrap();

        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                poll_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            queue.clone(),
            registry,
            store.clone(),
            logs.clone(),
            bus,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown().await;

        let view = logs.roll_up(child.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
    }
}
