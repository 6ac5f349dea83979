//! `github_repo`, `github_actions`: validate a `repo` key and fan out one
//! child per entry of a configured list key (§4.6 supplement).

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{QueuedJob, Step, StepConfigValue, WorkflowDefinition};
use crate::workers::{WorkerContext, WorkerError};

use super::StepWorker;

pub struct FanOutWorker {
    step_type: &'static str,
    list_key: &'static str,
}

impl FanOutWorker {
    pub fn new(step_type: &'static str, list_key: &'static str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { step_type, list_key })
    }
}

#[async_trait]
impl StepWorker for FanOutWorker {
    fn step_type(&self) -> &'static str {
        self.step_type
    }

    fn validate(&self, step: &Step) -> std::result::Result<(), WorkerError> {
        match step.config.get("repo").and_then(|v| v.as_str()) {
            Some(repo) if !repo.is_empty() => {}
            _ => return Err(WorkerError::invalid_config("repo", "required non-empty string")),
        }
        match step.config.get(self.list_key).and_then(|v| v.as_list()) {
            Some(_) => Ok(()),
            None => Err(WorkerError::invalid_config(self.list_key, "required list")),
        }
    }

    async fn create_jobs(
        &self,
        step: &Step,
        _workflow: &WorkflowDefinition,
        parent_job_id: Uuid,
        ctx: &WorkerContext,
    ) -> std::result::Result<Uuid, WorkerError> {
        self.validate(step)?;
        let repo = step.config["repo"].as_str().unwrap().to_string();
        let items = step.config[self.list_key].as_list().unwrap().to_vec();

        ctx.ensure_parent(parent_job_id).await?;
        for (i, item) in items.into_iter().enumerate() {
            let mut config = HashMap::new();
            config.insert("repo".to_string(), StepConfigValue::String(repo.clone()));
            config.insert("entry".to_string(), item);
            ctx.spawn_child(parent_job_id, self.step_type, format!("{}-{i}", step.name), config)
                .await?;
        }
        Ok(parent_job_id)
    }

    async fn execute(&self, job: &QueuedJob, ctx: &WorkerContext) -> std::result::Result<(), WorkerError> {
        ctx.mark_running(job).await?;
        let repo = job.config.get("repo").and_then(|v| v.as_str()).unwrap_or_default();
        ctx.publish_domain_event(
            "document.saved",
            job,
            serde_json::json!({ "worker": self.step_type, "repo": repo }),
        );
        ctx.mark_completed(job).await?;
        Ok(())
    }

    fn returns_child_jobs(&self) -> bool {
        true
    }
}
