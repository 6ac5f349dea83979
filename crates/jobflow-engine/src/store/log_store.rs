use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{JobLogEntry, RuntimeView};

use super::Result;

/// Append-only per-job log; the sole place runtime state lives durably
/// (§4.2).
#[async_trait]
pub trait JobLogStore: Send + Sync {
    /// Append an entry. Idempotent on `(job_id, sequence)`: a second write
    /// of an already-seen pair is a no-op. Durable before returning success.
    async fn append(&self, entry: JobLogEntry) -> Result<()>;

    /// Read entries for `job_id` from `from_sequence`, sequence-ordered, up
    /// to `limit` entries.
    async fn read(&self, job_id: Uuid, from_sequence: u64, limit: usize) -> Result<Vec<JobLogEntry>>;

    /// Roll up `job_id`'s log into a [`RuntimeView`]. `parent_id` is left
    /// `None`; callers needing the full view go through
    /// [`crate::aggregator::StateAggregator::state_of`].
    async fn roll_up(&self, job_id: Uuid) -> Result<RuntimeView>;

    /// The next unused sequence number for `job_id` (for callers composing
    /// new entries, e.g. the orchestrator and monitor).
    async fn next_sequence(&self, job_id: Uuid) -> Result<u64>;

    /// Delete every entry for `job_id` (used by [`crate::store::JobStore`]'s
    /// cascading delete).
    async fn delete_for_job(&self, job_id: Uuid) -> Result<()>;
}
