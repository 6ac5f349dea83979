//! `crawler`: fans out from a seed URL, one child job per discovered link,
//! bounded by `max_depth` (§4.6 supplement).
//!
//! The actual fetch is out of scope (§1): what a crawl "discovers" is
//! delegated to an injectable [`LinkSource`], defaulting to a fixed,
//! empty-by-default in-memory graph so the worker is deterministic and
//! network-free without a test double.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{QueuedJob, Step, StepConfigValue, WorkflowDefinition};
use crate::workers::{WorkerContext, WorkerError};

use super::StepWorker;

/// What a crawl step "discovers" at a URL and depth. Out-of-scope business
/// logic (§1) stood in for by a narrow trait.
pub trait LinkSource: Send + Sync {
    fn links(&self, url: &str, depth: u32) -> Vec<String>;
}

/// A link graph fixed at construction time; returns no links for an
/// unknown URL.
#[derive(Default)]
pub struct FixedLinkSource {
    graph: HashMap<String, Vec<String>>,
}

impl FixedLinkSource {
    pub fn new(graph: HashMap<String, Vec<String>>) -> Self {
        Self { graph }
    }
}

impl LinkSource for FixedLinkSource {
    fn links(&self, url: &str, _depth: u32) -> Vec<String> {
        self.graph.get(url).cloned().unwrap_or_default()
    }
}

pub struct CrawlerWorker {
    link_source: Arc<dyn LinkSource>,
}

impl CrawlerWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            link_source: Arc::new(FixedLinkSource::default()),
        })
    }

    pub fn with_link_source(link_source: Arc<dyn LinkSource>) -> Arc<Self> {
        Arc::new(Self { link_source })
    }

    fn max_depth(config: &HashMap<String, StepConfigValue>) -> u32 {
        config
            .get("max_depth")
            .and_then(|v| v.as_i64())
            .map(|v| v.max(0) as u32)
            .unwrap_or(1)
    }
}

#[async_trait]
impl StepWorker for CrawlerWorker {
    fn step_type(&self) -> &'static str {
        "crawler"
    }

    fn validate(&self, step: &Step) -> std::result::Result<(), WorkerError> {
        match step.config.get("seed_url").and_then(|v| v.as_str()) {
            Some(url) if !url.is_empty() => Ok(()),
            _ => Err(WorkerError::invalid_config("seed_url", "required non-empty string")),
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
        let seed_url = step.config["seed_url"].as_str().unwrap().to_string();
        let max_depth = Self::max_depth(&step.config);

        ctx.ensure_parent(parent_job_id).await?;
        let mut config = HashMap::new();
        config.insert("url".to_string(), StepConfigValue::String(seed_url));
        config.insert("depth".to_string(), StepConfigValue::Integer(0));
        config.insert("max_depth".to_string(), StepConfigValue::Integer(max_depth as i64));

        ctx.spawn_child(parent_job_id, "crawler", format!("{}-seed", step.name), config)
            .await?;
        Ok(parent_job_id)
    }

    async fn execute(&self, job: &QueuedJob, ctx: &WorkerContext) -> std::result::Result<(), WorkerError> {
        let parent_id = job
            .parent_id
            .ok_or_else(|| WorkerError::fatal("crawler job has no parent"))?;
        let url = job
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WorkerError::fatal("crawler job missing url"))?
            .to_string();
        let depth = job.config.get("depth").and_then(|v| v.as_i64()).unwrap_or(0) as u32;
        let max_depth = Self::max_depth(&job.config);

        ctx.mark_running(job).await?;

        if depth < max_depth {
            for (i, link) in self.link_source.links(&url, depth).into_iter().enumerate() {
                let mut config = HashMap::new();
                config.insert("url".to_string(), StepConfigValue::String(link));
                config.insert("depth".to_string(), StepConfigValue::Integer((depth + 1) as i64));
                config.insert("max_depth".to_string(), StepConfigValue::Integer(max_depth as i64));
                ctx.spawn_child(parent_id, "crawler", format!("{}-{}-{i}", job.name, depth + 1), config)
                    .await?;
            }
        }

        ctx.publish_domain_event("document.saved", job, serde_json::json!({ "url": url }));
        ctx.mark_completed(job).await?;
        Ok(())
    }

    fn returns_child_jobs(&self) -> bool {
        true
    }
}
