use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workflow::StepConfigValue;

/// The unit the queue carries and the Job Store persists.
///
/// Once written, none of these fields are ever mutated: a [`QueuedJob`] read
/// back from the store or off the queue is bit-identical to the one that
/// was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub job_type: String,
    pub name: String,
    pub config: HashMap<String, StepConfigValue>,
    pub metadata: HashMap<String, StepConfigValue>,
    pub created_at: DateTime<Utc>,
    pub depth: u32,
}

impl QueuedJob {
    /// Construct a root (parent) job: `parent_id = None`, `depth = 0`.
    pub fn root(job_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            parent_id: None,
            job_type: job_type.into(),
            name: name.into(),
            config: HashMap::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            depth: 0,
        }
    }

    /// Construct a child of `parent`, with `depth = parent.depth + 1`.
    pub fn child(
        parent: &QueuedJob,
        job_type: impl Into<String>,
        name: impl Into<String>,
        config: HashMap<String, StepConfigValue>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            parent_id: Some(parent.id),
            job_type: job_type.into(),
            name: name.into(),
            config,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            depth: parent.depth + 1,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Terminal and non-terminal job states (§3 Runtime View).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Orchestrator-level outcome (§4.8 step 6): some step was allowed to
    /// fail via `on_error = continue`.
    PartiallyCompleted,
}

impl JobStatus {
    /// Every variant, in declaration order. Used by read paths (e.g.
    /// `StateAggregator::list_jobs`) that page across the whole status
    /// index when no filter narrows it.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::PartiallyCompleted,
    ];

    /// One of `completed`, `failed`, `cancelled`, `partially_completed`:
    /// once entered, the job emits no further status changes (GLOSSARY).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::PartiallyCompleted
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::PartiallyCompleted => "partially_completed",
        };
        f.write_str(s)
    }
}

/// Child-completion counters, rolled up from `progress` log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub running: u64,
}

/// Derived, in-memory combination of an immutable [`QueuedJob`] and the
/// latest roll-up of its log (§3 Runtime View).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeView {
    pub job_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub status: JobStatus,
    pub progress: Progress,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RuntimeView {
    /// A view for a job that has no log entries yet: `pending`, zeroed
    /// progress.
    pub fn pending(job: &QueuedJob) -> Self {
        Self {
            job_id: job.id,
            parent_id: job.parent_id,
            status: JobStatus::Pending,
            progress: Progress::default(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}
