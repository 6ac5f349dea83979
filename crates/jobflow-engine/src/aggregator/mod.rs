//! Stateless Runtime View composition (§4.10).
//!
//! `state_of` is the one place a job's immutable record (Job Store) and its
//! rolled-up runtime state (Job Log Store) are combined into the
//! [`RuntimeView`] callers actually want. The Monitor's own re-scan goes
//! straight to the Job Log Store for speed (it already knows the parent),
//! but read APIs and tests should go through here.

use std::sync::Arc;

use uuid::Uuid;

use crate::model::{JobStatus, RuntimeView};
use crate::store::{JobLogStore, JobStore, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Combines a [`JobStore`] and a [`JobLogStore`] into the read surface
/// described in §6 (`get_job`, `get_children`, `list_jobs` minus the
/// transport).
pub struct StateAggregator {
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
}

/// Filter accepted by [`StateAggregator::list_jobs`]. `status` is the only
/// predicate the underlying [`JobStore::list_by_status`] index supports;
/// an absent `status` lists every terminal and non-terminal status in turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
}

impl StateAggregator {
    pub fn new(job_store: Arc<dyn JobStore>, log_store: Arc<dyn JobLogStore>) -> Arc<Self> {
        Arc::new(Self { job_store, log_store })
    }

    /// `state_of(job_id) -> RuntimeView` (§4.10): the immutable `parent_id`
    /// from the Job Store merged with the rolled-up status/progress from
    /// the Job Log Store.
    pub async fn state_of(&self, job_id: Uuid) -> Result<RuntimeView> {
        let job = self.job_store.get(job_id).await?;
        let mut view = self.log_store.roll_up(job_id).await?;
        view.parent_id = job.parent_id;
        Ok(view)
    }

    pub async fn children_of(&self, parent_id: Uuid) -> Result<Vec<RuntimeView>> {
        let children = self.job_store.list_children(parent_id).await?;
        let mut views = Vec::with_capacity(children.len());
        for child in children {
            let mut view = self.log_store.roll_up(child.id).await?;
            view.parent_id = child.parent_id;
            views.push(view);
        }
        Ok(views)
    }

    /// `list_jobs({filter, limit, offset}) -> [RuntimeView]` (§6): pages
    /// over the denormalized status index, rolling each match up through
    /// the Job Log Store. With no `status` filter this walks every
    /// [`JobStatus`] variant in turn, so paging is stable only within a
    /// single status.
    pub async fn list_jobs(
        &self,
        filter: JobFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RuntimeView>> {
        let statuses: Vec<JobStatus> = match filter.status {
            Some(status) => vec![status],
            None => JobStatus::ALL.to_vec(),
        };

        let mut matched = Vec::new();
        for status in statuses {
            matched.extend(self.job_store.list_by_status(status).await?);
        }

        let mut views = Vec::with_capacity(limit.min(matched.len()));
        for job in matched.into_iter().skip(offset).take(limit) {
            let mut view = self.log_store.roll_up(job.id).await?;
            view.parent_id = job.parent_id;
            views.push(view);
        }
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobLogEntry, JobStatus, QueuedJob};
    use crate::store::{InMemoryJobLogStore, InMemoryJobStore};
    use chrono::Utc;

    #[tokio::test]
    async fn state_of_merges_parent_id_with_rolled_up_status() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let parent = QueuedJob::root("parent", "wf");
        store.create(parent.clone()).await.unwrap();
        let child = QueuedJob::child(&parent, "transform", "c", Default::default());
        store.create_child(parent.id, child.clone()).await.unwrap();
        logs.append(JobLogEntry::status_change(child.id, 0, JobStatus::Running))
            .await
            .unwrap();

        let aggregator = StateAggregator::new(store, logs);
        let view = aggregator.state_of(child.id).await.unwrap();
        assert_eq!(view.parent_id, Some(parent.id));
        assert_eq!(view.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn children_of_returns_rolled_up_views() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let parent = QueuedJob::root("parent", "wf");
        store.create(parent.clone()).await.unwrap();
        let child = QueuedJob::child(&parent, "transform", "c", Default::default());
        store.create_child(parent.id, child.clone()).await.unwrap();

        let aggregator = StateAggregator::new(store, logs);
        let views = aggregator.children_of(parent.id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].job_id, child.id);
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status_and_pages() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        for i in 0..3 {
            let job = QueuedJob::root("transform", format!("job-{i}"));
            store.create(job.clone()).await.unwrap();
            logs.append(JobLogEntry::status_change(job.id, 0, JobStatus::Running))
                .await
                .unwrap();
            store.note_status(job.id, JobStatus::Running, Utc::now()).await.unwrap();
        }
        let done = QueuedJob::root("transform", "job-done");
        store.create(done.clone()).await.unwrap();
        logs.append(JobLogEntry::status_change(done.id, 0, JobStatus::Completed))
            .await
            .unwrap();
        store.note_status(done.id, JobStatus::Completed, Utc::now()).await.unwrap();

        let aggregator = StateAggregator::new(store, logs);

        let running = aggregator
            .list_jobs(JobFilter { status: Some(JobStatus::Running) }, 10, 0)
            .await
            .unwrap();
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|v| v.status == JobStatus::Running));

        let page = aggregator
            .list_jobs(JobFilter { status: Some(JobStatus::Running) }, 2, 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let all = aggregator.list_jobs(JobFilter::default(), 10, 0).await.unwrap();
        assert_eq!(all.len(), 4);
    }
}
