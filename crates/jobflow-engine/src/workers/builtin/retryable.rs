//! `transform`, `reindex`: single-child, config-driven pass-through
//! workers exercising the `on_error = retry` path (§4.6 supplement).
//!
//! `fail_times` in the step config controls how many times the spawned
//! child reports a retryable failure before succeeding; omitted or absent
//! means "always fail", which is what seed scenario 3 (retry exhaustion)
//! exercises. The count comes from the job's own log rather than an
//! in-memory counter, since a job may be picked up by a different worker
//! instance after a crash.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{LogKind, QueuedJob, Step, WorkflowDefinition};
use crate::workers::{WorkerContext, WorkerError};

use super::StepWorker;

pub struct RetryableWorker {
    step_type: &'static str,
}

impl RetryableWorker {
    pub fn new(step_type: &'static str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { step_type })
    }
}

#[async_trait]
impl StepWorker for RetryableWorker {
    fn step_type(&self) -> &'static str {
        self.step_type
    }

    fn validate(&self, _step: &Step) -> std::result::Result<(), WorkerError> {
        Ok(())
    }

    async fn create_jobs(
        &self,
        step: &Step,
        _workflow: &WorkflowDefinition,
        parent_job_id: Uuid,
        ctx: &WorkerContext,
    ) -> std::result::Result<Uuid, WorkerError> {
        ctx.ensure_parent(parent_job_id).await?;
        ctx.spawn_child(parent_job_id, self.step_type, step.name.clone(), step.config.clone())
            .await?;
        Ok(parent_job_id)
    }

    async fn execute(&self, job: &QueuedJob, ctx: &WorkerContext) -> std::result::Result<(), WorkerError> {
        let fail_times = job
            .config
            .get("fail_times")
            .and_then(|v| v.as_i64())
            .map(|v| v.max(0) as u64)
            .unwrap_or(u64::MAX);

        let prior_attempts = ctx
            .log_store
            .read(job.id, 0, usize::MAX)
            .await?
            .iter()
            .filter(|e| e.kind == LogKind::Error)
            .count() as u64;

        ctx.mark_running(job).await?;

        if prior_attempts < fail_times {
            let seq = ctx.log_store.next_sequence(job.id).await?;
            ctx.log_store
                .append(crate::model::JobLogEntry::error(
                    job.id,
                    seq,
                    format!("{} attempt {} failed", self.step_type, prior_attempts + 1),
                ))
                .await?;
            return Err(WorkerError::retryable(format!(
                "{} not ready yet (attempt {})",
                self.step_type,
                prior_attempts + 1
            )));
        }

        ctx.publish_domain_event(
            "document.saved",
            job,
            serde_json::json!({ "worker": self.step_type, "attempts": prior_attempts + 1 }),
        );
        ctx.mark_completed(job).await?;
        Ok(())
    }

    fn returns_child_jobs(&self) -> bool {
        false
    }
}
