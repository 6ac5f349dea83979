use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::QueuedJob;

/// The envelope the persistent queue carries (§3 Queue Message).
///
/// Invariants enforced by [`crate::queue::PersistentQueue`], not by this
/// type: at most one holder between `receive` and `delete`/expiry;
/// `receive_count` increases by one per receive; droppable only after an
/// explicit `delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub job_id: Uuid,
    pub body: QueuedJob,
    pub visible_at: DateTime<Utc>,
    pub receive_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(body: QueuedJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            job_id: body.id,
            body,
            visible_at: now,
            receive_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Opaque handle returned by `receive`, scoped to a single in-flight
/// delivery. Operations against a stale token (superseded by redelivery or
/// already deleted) fail rather than silently no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckToken {
    pub message_id: Uuid,
    /// `receive_count` at the moment this token was issued; `extend` and
    /// `delete` are rejected once the live count has moved past it.
    pub receive_count: u32,
}
