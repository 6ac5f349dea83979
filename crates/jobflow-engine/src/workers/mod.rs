//! Worker Registry and Step Worker contract (§4.5, §4.6).
//!
//! Workers are a closed variant set at registration time, routed by a
//! dictionary lookup rather than an inheritance chain (§9 Design Notes).

mod context;
mod error;

pub mod builtin;

pub use context::WorkerContext;
pub use error::{RegistryError, WorkerError};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{QueuedJob, Step, WorkflowDefinition};

/// A worker declares a single `type` and exposes the four operations in
/// §4.6's contract table.
#[async_trait]
pub trait StepWorker: Send + Sync {
    /// The step-type token this worker claims.
    fn step_type(&self) -> &'static str;

    /// `ok` if `step.config` meets this worker's schema.
    fn validate(&self, step: &Step) -> std::result::Result<(), WorkerError>;

    /// Turn a resolved step into zero or more queued child jobs under
    /// `parent_job_id`. Returns the effective parent job id (usually the
    /// input).
    async fn create_jobs(
        &self,
        step: &Step,
        workflow: &WorkflowDefinition,
        parent_job_id: Uuid,
        ctx: &WorkerContext,
    ) -> std::result::Result<Uuid, WorkerError>;

    /// Perform one unit of work for a dequeued job.
    async fn execute(&self, job: &QueuedJob, ctx: &WorkerContext) -> std::result::Result<(), WorkerError>;

    /// If `false`, the orchestrator considers this step's work complete as
    /// soon as `create_jobs` returns; if `true`, it waits on the Monitor.
    fn returns_child_jobs(&self) -> bool;
}

/// Maps a step type to the worker that handles it (§4.5).
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<&'static str, Arc<dyn StepWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in step type registered (§4.6's closed list), ready for
    /// a default engine assembly.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for worker in builtin::all() {
            registry
                .register(worker)
                .expect("builtin workers never collide on step type");
        }
        registry
    }

    pub fn register(&mut self, worker: Arc<dyn StepWorker>) -> std::result::Result<(), RegistryError> {
        let step_type = worker.step_type();
        if self.workers.contains_key(step_type) {
            return Err(RegistryError::DuplicateStepType(step_type.to_string()));
        }
        self.workers.insert(step_type, worker);
        Ok(())
    }

    pub fn route(&self, step_type: &str) -> std::result::Result<Arc<dyn StepWorker>, RegistryError> {
        self.workers
            .get(step_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStepType(step_type.to_string()))
    }

    pub fn validate(&self, step: &Step) -> std::result::Result<(), WorkerError> {
        match self.route(&step.step_type) {
            Ok(worker) => worker.validate(step),
            Err(_) => Err(WorkerError::invalid_config(
                "type",
                format!("no worker registered for step type `{}`", step.step_type),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_builtins_registers_all_nine_step_types() {
        let registry = WorkerRegistry::with_builtins();
        for step_type in [
            "crawler",
            "agent",
            "web_search",
            "places_search",
            "github_repo",
            "github_actions",
            "transform",
            "reindex",
            "database_maintenance",
        ] {
            assert!(registry.route(step_type).is_ok(), "missing worker for {step_type}");
        }
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut registry = WorkerRegistry::new();
        registry.register(builtin::crawler_worker()).unwrap();
        let err = registry.register(builtin::crawler_worker()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateStepType(_)));
    }

    #[test]
    fn unknown_step_type_is_a_registry_error() {
        let registry = WorkerRegistry::new();
        assert!(matches!(
            registry.route("does_not_exist"),
            Err(RegistryError::UnknownStepType(_))
        ));
    }
}
