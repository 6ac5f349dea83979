//! Data model shared by every engine component (§3 of the governing spec).
//!
//! Queued Jobs are immutable once written; all runtime state lives in the
//! append-only [`JobLogEntry`] stream and is rolled up into a [`RuntimeView`]
//! on demand.

mod event;
mod job;
mod log;
mod queue_message;
mod template;
mod toposort;
mod workflow;

pub use event::Event;
pub use job::{JobStatus, Progress, QueuedJob, RuntimeView};
pub use log::{roll_up, roll_up_bare, JobLogEntry, LogKind};
pub use queue_message::{AckToken, QueueMessage};
pub use template::{resolve_placeholders, TemplateError};
pub use toposort::{topo_sort, TopoError};
pub use workflow::{Step, StepConfigValue, StepErrorPolicy, WorkflowDefinition};
