use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobStatus, Progress, QueuedJob, RuntimeView};

/// Append-only log entry kind (§3 Job Log Entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    StatusChange,
    Progress,
    Error,
    Info,
    Warn,
    Debug,
}

/// One append-only entry in a job's log. `sequence` is per-job monotonic;
/// rolling up entries in sequence order yields the job's current
/// [`RuntimeView`] — this is the only place runtime state lives durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: Uuid,
    pub sequence: u64,
    pub kind: LogKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl JobLogEntry {
    pub fn new(job_id: Uuid, sequence: u64, kind: LogKind, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            sequence,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn status_change(job_id: Uuid, sequence: u64, status: JobStatus) -> Self {
        Self::new(
            job_id,
            sequence,
            LogKind::StatusChange,
            serde_json::json!({ "status": status.to_string() }),
        )
    }

    pub fn status_change_with_reason(
        job_id: Uuid,
        sequence: u64,
        status: JobStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            job_id,
            sequence,
            LogKind::StatusChange,
            serde_json::json!({ "status": status.to_string(), "reason": reason.into() }),
        )
    }

    pub fn progress(job_id: Uuid, sequence: u64, progress: Progress) -> Self {
        Self::new(
            job_id,
            sequence,
            LogKind::Progress,
            serde_json::to_value(progress).expect("Progress always serializes"),
        )
    }

    pub fn info(job_id: Uuid, sequence: u64, message: impl Into<String>) -> Self {
        Self::new(
            job_id,
            sequence,
            LogKind::Info,
            serde_json::json!({ "message": message.into() }),
        )
    }

    pub fn error(job_id: Uuid, sequence: u64, message: impl Into<String>) -> Self {
        Self::new(
            job_id,
            sequence,
            LogKind::Error,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

/// Deterministically fold a sequence-ordered log into a [`RuntimeView`].
///
/// `entries` must already be sorted by `sequence`; callers (the stores) are
/// responsible for that ordering since it is cheap to maintain at the write
/// side and this function has no way to recover a missing order.
pub fn roll_up(job: &QueuedJob, entries: &[JobLogEntry]) -> RuntimeView {
    fold(RuntimeView::pending(job), entries)
}

/// Roll up a log without a [`QueuedJob`] on hand. Used by
/// [`crate::store::JobLogStore::roll_up`], which only has a `job_id`; the
/// resulting view's `parent_id` is left `None` until
/// [`crate::aggregator::StateAggregator`] merges in the immutable record.
pub fn roll_up_bare(job_id: uuid::Uuid, entries: &[JobLogEntry]) -> RuntimeView {
    let view = RuntimeView {
        job_id,
        parent_id: None,
        status: JobStatus::Pending,
        progress: Progress::default(),
        started_at: None,
        completed_at: None,
        error: None,
    };
    fold(view, entries)
}

fn fold(mut view: RuntimeView, entries: &[JobLogEntry]) -> RuntimeView {
    for entry in entries {
        match entry.kind {
            LogKind::StatusChange => {
                if let Some(status) = entry
                    .payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(parse_status)
                {
                    if status == JobStatus::Running && view.started_at.is_none() {
                        view.started_at = Some(entry.timestamp);
                    }
                    if status.is_terminal() {
                        view.completed_at = Some(entry.timestamp);
                    }
                    if status == JobStatus::Failed || status == JobStatus::Cancelled {
                        if let Some(reason) = entry.payload.get("reason").and_then(|v| v.as_str())
                        {
                            view.error = Some(reason.to_string());
                        }
                    }
                    view.status = status;
                }
            }
            LogKind::Progress => {
                if let Ok(progress) = serde_json::from_value::<Progress>(entry.payload.clone()) {
                    view.progress = progress;
                }
            }
            LogKind::Error => {
                if let Some(message) = entry.payload.get("message").and_then(|v| v.as_str()) {
                    view.error = Some(message.to_string());
                }
            }
            LogKind::Info | LogKind::Warn | LogKind::Debug => {}
        }
    }

    view
}

fn parse_status(raw: &str) -> Option<JobStatus> {
    match raw {
        "pending" => Some(JobStatus::Pending),
        "running" => Some(JobStatus::Running),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        "partially_completed" => Some(JobStatus::PartiallyCompleted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_up_tracks_latest_status_and_progress() {
        let job = QueuedJob::root("parent", "wf");
        let entries = vec![
            JobLogEntry::status_change(job.id, 0, JobStatus::Pending),
            JobLogEntry::status_change(job.id, 1, JobStatus::Running),
            JobLogEntry::progress(
                job.id,
                2,
                Progress {
                    processed: 1,
                    failed: 0,
                    total: 4,
                    running: 3,
                },
            ),
            JobLogEntry::status_change(job.id, 3, JobStatus::Completed),
        ];

        let view = roll_up(&job, &entries);
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress.processed, 1);
        assert_eq!(view.progress.total, 4);
        assert!(view.started_at.is_some());
        assert!(view.completed_at.is_some());
    }

    #[test]
    fn roll_up_captures_failure_reason() {
        let job = QueuedJob::root("parent", "wf");
        let entries = vec![JobLogEntry::status_change_with_reason(
            job.id,
            0,
            JobStatus::Failed,
            "exceeded_max_receive",
        )];

        let view = roll_up(&job, &entries);
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("exceeded_max_receive"));
    }
}
