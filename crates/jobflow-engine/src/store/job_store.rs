use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{JobStatus, QueuedJob};

use super::Result;

/// Immutable-record store for Queued Jobs (§4.4).
///
/// `create`/`create_child` are durable before they return and emit no state
/// beyond the record itself — all runtime mutation happens via the
/// [`crate::store::JobLogStore`]. The `status`/`updated_at` columns this
/// trait exposes through [`JobStore::list_by_status`] and
/// [`JobStore::list_stale`] are a denormalized index kept in step with the
/// log via [`JobStore::note_status`]; they are never treated as the source
/// of truth for a job's state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a root job record.
    async fn create(&self, job: QueuedJob) -> Result<()>;

    /// Persist a child job record; rejected if `parent_id` does not exist.
    async fn create_child(&self, parent_id: Uuid, job: QueuedJob) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<QueuedJob>;

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<QueuedJob>>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<QueuedJob>>;

    /// Jobs whose status index was last updated before `older_than`.
    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<QueuedJob>>;

    /// Delete a job; cascades to descendants and their log entries (the
    /// implementation holds a [`crate::store::JobLogStore`] handle to
    /// perform the log-side cascade).
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Update the denormalized status index for `id` without touching the
    /// immutable job record. Called alongside every log append that changes
    /// a job's status (orchestrator, monitor, worker pool).
    async fn note_status(&self, id: Uuid, status: JobStatus, at: DateTime<Utc>) -> Result<()>;
}
