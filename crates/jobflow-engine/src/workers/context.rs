use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::model::{Event, JobLogEntry, JobStatus, QueuedJob, StepConfigValue};
use crate::queue::PersistentQueue;
use crate::store::{JobLogStore, JobStore};

use super::error::WorkerError;

/// The handles a [`super::StepWorker`] needs to do its job: persist
/// records, enqueue work, append to logs, and publish events. Bundled here
/// so the `StepWorker` trait's methods stay close to the contract in §4.6
/// rather than each carrying four constructor arguments.
#[derive(Clone)]
pub struct WorkerContext {
    pub job_store: Arc<dyn JobStore>,
    pub log_store: Arc<dyn JobLogStore>,
    pub queue: Arc<dyn PersistentQueue>,
    pub bus: Arc<EventBus>,
}

impl WorkerContext {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
        queue: Arc<dyn PersistentQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            job_store,
            log_store,
            queue,
            bus,
        }
    }

    /// Create `parent_job_id`'s record if it doesn't already exist (§4.6
    /// `create_jobs`: "creates one parent job record if not already
    /// present"). Every job this engine creates attaches directly to the
    /// workflow root, so in the normal orchestrator-driven path the
    /// orchestrator has already created it; this guard only fires when a
    /// worker's `create_jobs` is exercised directly, e.g. in tests.
    pub async fn ensure_parent(&self, parent_job_id: Uuid) -> std::result::Result<QueuedJob, WorkerError> {
        match self.job_store.get(parent_job_id).await {
            Ok(job) => Ok(job),
            Err(_) => {
                let mut job = QueuedJob::root("parent", "parent");
                job.id = parent_job_id;
                self.job_store.create(job.clone()).await?;
                Ok(job)
            }
        }
    }

    /// Spawn one child of `parent_id`: persists the child record, appends
    /// its initial `pending` log entry, enqueues it, records an `info`
    /// entry on the parent's own log, and publishes `job.spawn` (§4.6).
    pub async fn spawn_child(
        &self,
        parent_id: Uuid,
        job_type: impl Into<String>,
        name: impl Into<String>,
        config: HashMap<String, StepConfigValue>,
    ) -> std::result::Result<QueuedJob, WorkerError> {
        let parent = self.ensure_parent(parent_id).await?;
        let child = QueuedJob::child(&parent, job_type, name, config);

        self.job_store.create_child(parent.id, child.clone()).await?;
        self.log_store
            .append(JobLogEntry::status_change(child.id, 0, JobStatus::Pending))
            .await?;
        self.queue.enqueue(child.clone()).await?;

        let parent_seq = self.log_store.next_sequence(parent.id).await?;
        self.log_store
            .append(JobLogEntry::info(
                parent.id,
                parent_seq,
                format!("spawned child `{}` ({})", child.name, child.id),
            ))
            .await?;

        self.bus.publish(Event::new(
            "job.spawn",
            serde_json::json!({
                "job_id": child.id,
                "parent_id": parent.id,
                "name": child.name,
                "type": child.job_type,
            }),
        ));

        Ok(child)
    }

    /// Append `status_change = running` and publish the matching event.
    pub async fn mark_running(&self, job: &QueuedJob) -> std::result::Result<(), WorkerError> {
        self.change_status(job, JobStatus::Running, None).await
    }

    /// Append `status_change = completed` and publish the matching event.
    pub async fn mark_completed(&self, job: &QueuedJob) -> std::result::Result<(), WorkerError> {
        self.change_status(job, JobStatus::Completed, None).await
    }

    /// Append `status_change = failed` with `reason` and publish the
    /// matching event.
    pub async fn mark_failed(
        &self,
        job: &QueuedJob,
        reason: impl Into<String>,
    ) -> std::result::Result<(), WorkerError> {
        self.change_status(job, JobStatus::Failed, Some(reason.into())).await
    }

    async fn change_status(
        &self,
        job: &QueuedJob,
        status: JobStatus,
        reason: Option<String>,
    ) -> std::result::Result<(), WorkerError> {
        let seq = self.log_store.next_sequence(job.id).await?;
        let entry = match &reason {
            Some(reason) => JobLogEntry::status_change_with_reason(job.id, seq, status, reason.clone()),
            None => JobLogEntry::status_change(job.id, seq, status),
        };
        self.log_store.append(entry).await?;
        self.job_store.note_status(job.id, status, Utc::now()).await?;

        self.bus.publish(Event::new(
            "job.status_change",
            serde_json::json!({
                "job_id": job.id,
                "parent_id": job.parent_id,
                "status": status.to_string(),
                "reason": reason,
            }),
        ));
        Ok(())
    }

    /// Publish a domain event (e.g. `document.saved`) carrying `parent_id`
    /// so an upstream Monitor counts it (§4.6 `execute`).
    pub fn publish_domain_event(&self, event_type: impl Into<String>, job: &QueuedJob, extra: serde_json::Value) {
        let mut payload = serde_json::json!({
            "job_id": job.id,
            "parent_id": job.parent_id,
        });
        if let (Some(payload_map), Some(extra_map)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                payload_map.insert(k.clone(), v.clone());
            }
        }
        self.bus.publish(Event::new(event_type, payload));
    }
}
