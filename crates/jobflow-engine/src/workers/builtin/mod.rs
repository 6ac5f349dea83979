//! The nine built-in step workers (§4.6): thin, deterministic stand-ins
//! for the out-of-scope business logic (an HTTP crawl, an LLM call, a
//! search API, ...) each step type would otherwise delegate to.

mod crawler;
mod fan_out;
mod retryable;
mod single_child;

pub use crawler::{CrawlerWorker, FixedLinkSource, LinkSource};
pub use fan_out::FanOutWorker;
pub use retryable::RetryableWorker;
pub use single_child::SingleChildWorker;

use std::sync::Arc;

use super::StepWorker;

pub fn crawler_worker() -> Arc<dyn StepWorker> {
    CrawlerWorker::new()
}

/// Every built-in worker, ready for [`super::WorkerRegistry::with_builtins`].
pub fn all() -> Vec<Arc<dyn StepWorker>> {
    vec![
        crawler_worker(),
        SingleChildWorker::new("agent", &["prompt"]),
        SingleChildWorker::new("web_search", &["query"]),
        SingleChildWorker::new("places_search", &["query"]),
        FanOutWorker::new("github_repo", "paths"),
        FanOutWorker::new("github_actions", "workflows"),
        RetryableWorker::new("transform"),
        RetryableWorker::new("reindex"),
        SingleChildWorker::new("database_maintenance", &["operation"]),
    ]
}
