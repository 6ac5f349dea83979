use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{self, JobLogEntry, JobStatus, QueuedJob, RuntimeView};

use super::{JobLogStore, JobStore, Result, StoreError};

struct JobRecord {
    job: QueuedJob,
    status: JobStatus,
    updated_at: DateTime<Utc>,
}

/// In-memory [`JobStore`], used by tests and by embedders that don't need
/// crash-safe persistence.
pub struct InMemoryJobStore {
    log_store: Arc<dyn JobLogStore>,
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    children: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl InMemoryJobStore {
    pub fn new(log_store: Arc<dyn JobLogStore>) -> Arc<Self> {
        Arc::new(Self {
            log_store,
            jobs: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
        })
    }

    fn insert(&self, job: QueuedJob) {
        let now = Utc::now();
        let id = job.id;
        let parent_id = job.parent_id;
        self.jobs.write().insert(
            id,
            JobRecord {
                job,
                status: JobStatus::Pending,
                updated_at: now,
            },
        );
        if let Some(parent) = parent_id {
            self.children.write().entry(parent).or_default().push(id);
        }
    }

    fn descendants_of(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut frontier = vec![id];
        let children = self.children.read();
        while let Some(current) = frontier.pop() {
            if let Some(kids) = children.get(&current) {
                for kid in kids {
                    out.push(*kid);
                    frontier.push(*kid);
                }
            }
        }
        out
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: QueuedJob) -> Result<()> {
        self.insert(job);
        Ok(())
    }

    async fn create_child(&self, parent_id: Uuid, job: QueuedJob) -> Result<()> {
        if !self.jobs.read().contains_key(&parent_id) {
            return Err(StoreError::ParentNotFound(parent_id));
        }
        self.insert(job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<QueuedJob> {
        self.jobs
            .read()
            .get(&id)
            .map(|r| r.job.clone())
            .ok_or(StoreError::JobNotFound(id))
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<QueuedJob>> {
        let children = self.children.read();
        let jobs = self.jobs.read();
        Ok(children
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| jobs.get(id).map(|r| r.job.clone()))
            .collect())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<QueuedJob>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.job.clone())
            .collect())
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<QueuedJob>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|r| !r.status.is_terminal() && r.updated_at < older_than)
            .map(|r| r.job.clone())
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut ids = self.descendants_of(id);
        ids.push(id);

        for job_id in &ids {
            self.jobs.write().remove(job_id);
            self.children.write().remove(job_id);
            self.log_store.delete_for_job(*job_id).await?;
        }
        for siblings in self.children.write().values_mut() {
            siblings.retain(|sib| !ids.contains(sib));
        }
        Ok(())
    }

    async fn note_status(&self, id: Uuid, status: JobStatus, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        record.status = status;
        record.updated_at = at;
        Ok(())
    }
}

/// In-memory [`JobLogStore`].
pub struct InMemoryJobLogStore {
    logs: RwLock<HashMap<Uuid, Vec<JobLogEntry>>>,
}

impl InMemoryJobLogStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            logs: RwLock::new(HashMap::new()),
        })
    }
}

impl Default for InMemoryJobLogStore {
    fn default() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl JobLogStore for InMemoryJobLogStore {
    async fn append(&self, entry: JobLogEntry) -> Result<()> {
        let mut logs = self.logs.write();
        let entries = logs.entry(entry.job_id).or_default();
        if entries.iter().any(|e| e.sequence == entry.sequence) {
            return Ok(());
        }
        let pos = entries
            .iter()
            .position(|e| e.sequence > entry.sequence)
            .unwrap_or(entries.len());
        entries.insert(pos, entry);
        Ok(())
    }

    async fn read(&self, job_id: Uuid, from_sequence: u64, limit: usize) -> Result<Vec<JobLogEntry>> {
        Ok(self
            .logs
            .read()
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter(|e| e.sequence >= from_sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn roll_up(&self, job_id: Uuid) -> Result<RuntimeView> {
        let entries = self.logs.read().get(&job_id).cloned().unwrap_or_default();
        Ok(model::roll_up_bare(job_id, &entries))
    }

    async fn next_sequence(&self, job_id: Uuid) -> Result<u64> {
        Ok(self
            .logs
            .read()
            .get(&job_id)
            .and_then(|entries| entries.last())
            .map(|e| e.sequence + 1)
            .unwrap_or(0))
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<()> {
        self.logs.write().remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogKind;

    fn job(parent: Option<Uuid>) -> QueuedJob {
        let mut j = QueuedJob::root("parent", "wf");
        j.parent_id = parent;
        j
    }

    #[tokio::test]
    async fn create_child_rejected_without_parent() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs);
        let child = job(Some(Uuid::now_v7()));
        let err = store.create_child(child.parent_id.unwrap(), child).await.unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn delete_cascades_to_children_and_logs() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());

        let parent = job(None);
        store.create(parent.clone()).await.unwrap();
        let child = QueuedJob::child(&parent, "transform", "c", HashMap::new());
        store.create_child(parent.id, child.clone()).await.unwrap();
        logs.append(JobLogEntry::info(child.id, 0, "spawned")).await.unwrap();

        store.delete(parent.id).await.unwrap();

        assert!(matches!(store.get(parent.id).await, Err(StoreError::JobNotFound(_))));
        assert!(matches!(store.get(child.id).await, Err(StoreError::JobNotFound(_))));
        assert!(logs.read(child.id, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_is_idempotent_on_job_id_and_sequence() {
        let logs = InMemoryJobLogStore::new();
        let job_id = Uuid::now_v7();
        logs.append(JobLogEntry::new(job_id, 0, LogKind::Info, serde_json::json!({"a": 1})))
            .await
            .unwrap();
        logs.append(JobLogEntry::new(job_id, 0, LogKind::Info, serde_json::json!({"a": 2})))
            .await
            .unwrap();

        let entries = logs.read(job_id, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["a"], 1);
    }

    #[tokio::test]
    async fn next_sequence_follows_appended_entries() {
        let logs = InMemoryJobLogStore::new();
        let job_id = Uuid::now_v7();
        assert_eq!(logs.next_sequence(job_id).await.unwrap(), 0);
        logs.append(JobLogEntry::info(job_id, 0, "a")).await.unwrap();
        assert_eq!(logs.next_sequence(job_id).await.unwrap(), 1);
    }
}
