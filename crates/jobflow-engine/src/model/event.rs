use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A published, non-authoritative mirror of a log write (§3 Event).
///
/// Events are for live subscribers; the log store remains the source of
/// truth. `event_type` is a dotted topic such as `job.status_change`,
/// `job.progress`, `job.spawn`, or `document.saved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// The `job_id` carried in this event's payload, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        self.payload
            .get("job_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// The `parent_id` carried in this event's payload, if any.
    ///
    /// Any event carrying this field — not only `job.*` events — is fair
    /// game for a [`crate::monitor::Monitor`] watching that parent (§4.9).
    pub fn parent_id(&self) -> Option<Uuid> {
        self.payload
            .get("parent_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
