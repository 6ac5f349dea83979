//! Local-first job orchestration engine.
//!
//! ```text
//! Orchestrator ─▶ WorkerRegistry ─▶ StepWorker::create_jobs ─▶ JobStore + Queue
//!                                                                    │
//!                                                                    ▼
//!                                                              WorkerPool
//!                                                                    │
//!                                                                    ▼
//!                                                       StepWorker::execute
//!                                                          │      │      │
//!                                                   JobLogStore  Bus  new Queue items
//!                                                                    │
//!                                                                    ▼
//!                                                                 Monitor ─▶ Bus ─▶ subscribers
//! ```
//!
//! A [`Workflow Definition`](model::WorkflowDefinition) is handed to
//! [`Orchestrator::execute`](orchestrator::Orchestrator::execute), which creates a root job,
//! walks its steps in dependency order, and routes each one through a
//! [`WorkerRegistry`](workers::WorkerRegistry) to the [`StepWorker`](workers::StepWorker) that
//! knows how to turn it into queued work.

pub mod aggregator;
pub mod bus;
pub mod error;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod reliability;
pub mod store;
pub mod workers;

pub mod prelude {
    pub use crate::aggregator::{JobFilter, StateAggregator};
    pub use crate::bus::{EventBus, EventBusConfig};
    pub use crate::error::{EngineError, Result};
    pub use crate::model::{
        Event, JobLogEntry, JobStatus, LogKind, Progress, QueueMessage, QueuedJob, RuntimeView,
        Step, StepConfigValue, StepErrorPolicy, WorkflowDefinition,
    };
    pub use crate::monitor::{FailureAction, Monitor, ToleranceConfig};
    pub use crate::orchestrator::{Orchestrator, OrchestratorConfig};
    pub use crate::pool::{WorkerPool, WorkerPoolConfig};
    pub use crate::queue::{PersistentQueue, QueueConfig};
    pub use crate::reliability::RetryPolicy;
    pub use crate::store::{JobLogStore, JobStore};
    pub use crate::workers::{StepWorker, WorkerError, WorkerRegistry};
}

/// Backend-agnostic configuration for an assembled engine, matching the
/// configuration list in the Workflow Definition external interfaces.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    pub worker_pool_size: usize,
    pub queue_poll_timeout: std::time::Duration,
    pub visibility_timeout: std::time::Duration,
    pub max_receive: u32,
    pub monitor_scan_period: std::time::Duration,
    pub workflow_default_timeout: std::time::Duration,
    pub default_tolerance: monitor::ToleranceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            queue_poll_timeout: std::time::Duration::from_millis(500),
            visibility_timeout: std::time::Duration::from_secs(30),
            max_receive: 5,
            monitor_scan_period: std::time::Duration::from_secs(5),
            workflow_default_timeout: std::time::Duration::from_secs(30 * 60),
            default_tolerance: monitor::ToleranceConfig::default(),
        }
    }
}
