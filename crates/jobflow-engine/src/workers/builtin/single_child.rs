//! `agent`, `web_search`, `places_search`, `database_maintenance`: single-
//! child, config-validated workers (§4.6 supplement). Each validates a
//! fixed set of required config keys and enqueues exactly one child whose
//! `execute` records a synthetic result.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{QueuedJob, Step, WorkflowDefinition};
use crate::workers::{WorkerContext, WorkerError};

use super::StepWorker;

pub struct SingleChildWorker {
    step_type: &'static str,
    required: &'static [&'static str],
}

impl SingleChildWorker {
    pub fn new(step_type: &'static str, required: &'static [&'static str]) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { step_type, required })
    }
}

#[async_trait]
impl StepWorker for SingleChildWorker {
    fn step_type(&self) -> &'static str {
        self.step_type
    }

    fn validate(&self, step: &Step) -> std::result::Result<(), WorkerError> {
        for key in self.required {
            if !step.config.contains_key(*key) {
                return Err(WorkerError::invalid_config(*key, "required key is missing"));
            }
        }
        Ok(())
    }

    async fn create_jobs(
        &self,
        step: &Step,
        _workflow: &WorkflowDefinition,
        parent_job_id: Uuid,
        ctx: &WorkerContext,
    ) -> std::result::Result<Uuid, WorkerError> {
        self.validate(step)?;
        ctx.ensure_parent(parent_job_id).await?;
        ctx.spawn_child(parent_job_id, self.step_type, step.name.clone(), step.config.clone())
            .await?;
        Ok(parent_job_id)
    }

    async fn execute(&self, job: &QueuedJob, ctx: &WorkerContext) -> std::result::Result<(), WorkerError> {
        ctx.mark_running(job).await?;
        ctx.publish_domain_event(
            "document.saved",
            job,
            serde_json::json!({ "worker": self.step_type, "synthetic_result": true }),
        );
        ctx.mark_completed(job).await?;
        Ok(())
    }

    fn returns_child_jobs(&self) -> bool {
        false
    }
}
