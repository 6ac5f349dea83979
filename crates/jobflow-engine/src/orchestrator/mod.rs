//! Drives a [`WorkflowDefinition`] from a bare definition to a finished
//! root job (§4.8).
//!
//! The six steps: allocate a root job and start its [`Monitor`]; resolve
//! every step's placeholders up front so a missing credential fails the
//! workflow before any job is created; topologically order the steps;
//! route, validate and dispatch each one through the [`WorkerRegistry`],
//! applying its `on_error` policy; wait for the steps that fan out
//! children to settle; and finally write the root's own terminal status.
//!
//! That last write is split with the [`Monitor`]: in the normal path the
//! orchestrator writes it here, once, after every step has been
//! dispatched and every descendant is terminal. The monitor only writes
//! it early, itself, on the abnormal paths it owns outright — tolerance
//! exceeded or a hard timeout — and [`Monitor::cancel`]s the rest of the
//! subtree when it does. Both writers go through the same
//! terminal-status guard in the log roll-up, so whichever gets there
//! first wins and the other is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::bus::EventBus;
use crate::model::{
    resolve_placeholders, topo_sort, Event, JobLogEntry, JobStatus, QueuedJob, RuntimeView, Step,
    StepConfigValue, StepErrorPolicy, TemplateError, TopoError, WorkflowDefinition,
};
use crate::monitor::{Monitor, StopReason, ToleranceConfig};
use crate::queue::PersistentQueue;
use crate::reliability::RetryPolicy;
use crate::store::{JobLogStore, JobStore};
use crate::workers::{WorkerContext, WorkerError, WorkerRegistry};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unresolved placeholder `{{{placeholder}}}` in step `{step}`")]
    UnresolvedPlaceholder { step: String, placeholder: String },

    #[error(transparent)]
    Ordering(#[from] TopoError),

    #[error("step `{step}` failed: {source}")]
    StepFailed { step: String, source: WorkerError },

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Tunables that aren't part of a [`WorkflowDefinition`] itself (§4.8,
/// §4.9). Mirrors the relevant fields of
/// [`crate::EngineConfig`](../struct.EngineConfig.html) for callers
/// assembling an [`Orchestrator`] directly.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub monitor_scan_period: Duration,
    pub workflow_default_timeout: Duration,
    pub default_tolerance: ToleranceConfig,
    pub default_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor_scan_period: Duration::from_secs(5),
            workflow_default_timeout: Duration::from_secs(30 * 60),
            default_tolerance: ToleranceConfig::default(),
            default_retry: RetryPolicy::exponential(),
        }
    }
}

/// Walks a [`WorkflowDefinition`]'s steps in dependency order, dispatching
/// each through the [`WorkerRegistry`] (§4.8).
pub struct Orchestrator {
    config: OrchestratorConfig,
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
    queue: Arc<dyn PersistentQueue>,
    bus: Arc<EventBus>,
    registry: Arc<WorkerRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
        queue: Arc<dyn PersistentQueue>,
        bus: Arc<EventBus>,
        registry: Arc<WorkerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            job_store,
            log_store,
            queue,
            bus,
            registry,
        })
    }

    /// Run `workflow` to completion and return the root's final
    /// [`RuntimeView`]. `credentials` resolves `{name}` placeholders in
    /// every step's config (§4.8 step 3, §6).
    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        credentials: &HashMap<String, StepConfigValue>,
    ) -> Result<RuntimeView, OrchestratorError> {
        let root = QueuedJob::root(
            workflow.workflow_type.clone().unwrap_or_else(|| "workflow".to_string()),
            workflow.name.clone(),
        );
        self.job_store.create(root.clone()).await?;
        self.log_store
            .append(JobLogEntry::status_change(root.id, 0, JobStatus::Pending))
            .await?;
        self.job_store.note_status(root.id, JobStatus::Pending, Utc::now()).await?;

        let monitor = Monitor::spawn(
            root.id,
            workflow.error_tolerance,
            self.config.monitor_scan_period,
            workflow.timeout.unwrap_or(self.config.workflow_default_timeout),
            self.job_store.clone(),
            self.log_store.clone(),
            self.bus.clone(),
        );

        let resolved = match self.resolve_all_placeholders(workflow, credentials) {
            Ok(resolved) => resolved,
            Err(err) => {
                monitor.abort();
                self.mark_root_terminal(root.id, JobStatus::Failed, &err.to_string()).await?;
                return Err(err);
            }
        };

        let declared_order = {
            let mut names: Vec<String> = workflow.steps.keys().cloned().collect();
            names.sort();
            names
        };
        let ordered = match topo_sort(&workflow.steps, &declared_order) {
            Ok(ordered) => ordered,
            Err(err) => {
                monitor.abort();
                self.mark_root_terminal(root.id, JobStatus::Failed, &err.to_string()).await?;
                return Err(err.into());
            }
        };

        self.mark_root_running(&root).await?;

        let ctx = WorkerContext::new(
            self.job_store.clone(),
            self.log_store.clone(),
            self.queue.clone(),
            self.bus.clone(),
        );

        let mut any_step_continued_past_failure = false;
        let mut halted: Option<OrchestratorError> = None;

        for step in ordered {
            let resolved_config = resolved.get(&step.name).cloned().unwrap_or_default();
            let mut resolved_step = step.clone();
            resolved_step.config = resolved_config;

            match self.dispatch_step(&resolved_step, workflow, root.id, &ctx, &monitor).await {
                Ok(()) => {}
                Err(err) => match step.on_error {
                    StepErrorPolicy::Fail => {
                        warn!(step = %step.name, error = %err, "step failed, halting workflow");
                        halted = Some(err);
                        break;
                    }
                    StepErrorPolicy::Continue => {
                        warn!(step = %step.name, error = %err, "step failed, continuing (on_error = continue)");
                        any_step_continued_past_failure = true;
                        self.log_step_failure(root.id, &step.name, &err).await;
                    }
                    StepErrorPolicy::Retry => {
                        warn!(step = %step.name, error = %err, "step failed, halting workflow (retry exhausted)");
                        halted = Some(err);
                        break;
                    }
                },
            }
        }

        monitor.all_steps_dispatched();

        if let Some(err) = halted {
            if let Err(cancel_err) = monitor.cancel().await {
                warn!(root = %root.id, error = %cancel_err, "failed to cancel descendants after step halt");
            }
            monitor.abort();
            self.mark_root_terminal(root.id, JobStatus::Failed, &err.to_string()).await?;
            return Err(err);
        }

        let (counters, stop_reason) = monitor.wait_for_quiescence().await;

        let final_status = match stop_reason {
            Some(StopReason::ToleranceExceeded) | Some(StopReason::TimedOut) => {
                // The monitor already wrote the root's terminal status for
                // these; nothing left to do.
                monitor.abort();
                return self.current_view(root.id).await;
            }
            _ => {
                // Still within the tolerance threshold, but not every
                // descendant made it to `completed` — a dead-lettered or
                // cancelled child under `on_error = continue` resolves the
                // root to `partially_completed`, per §4.8 step 6.
                if any_step_continued_past_failure || counters.failed > 0 || counters.cancelled > 0
                {
                    JobStatus::PartiallyCompleted
                } else {
                    JobStatus::Completed
                }
            }
        };

        monitor.abort();
        self.mark_root_terminal(root.id, final_status, "").await?;
        self.current_view(root.id).await
    }

    async fn dispatch_step(
        &self,
        step: &Step,
        workflow: &WorkflowDefinition,
        root_id: uuid::Uuid,
        ctx: &WorkerContext,
        monitor: &Arc<Monitor>,
    ) -> Result<(), OrchestratorError> {
        let retry = RetryPolicy {
            max_attempts: step.max_attempts.unwrap_or(self.config.default_retry.max_attempts),
            ..self.config.default_retry.clone()
        };
        let attempts = if step.on_error == StepErrorPolicy::Retry {
            retry.max_attempts.max(1)
        } else {
            1
        };

        let mut last_err: Option<WorkerError> = None;
        for attempt in 1..=attempts {
            let worker = self
                .registry
                .route(&step.step_type)
                .map_err(|_| OrchestratorError::StepFailed {
                    step: step.name.clone(),
                    source: WorkerError::invalid_config(
                        "type",
                        format!("no worker registered for step type `{}`", step.step_type),
                    ),
                })?;

            if let Err(err) = worker.validate(step) {
                return Err(OrchestratorError::StepFailed { step: step.name.clone(), source: err });
            }

            match worker.create_jobs(step, workflow, root_id, ctx).await {
                Ok(_) => {
                    info!(step = %step.name, step_type = %step.step_type, attempt, "step dispatched");
                    monitor.force_rescan().await;
                    if worker.returns_child_jobs() {
                        monitor.wait_for_quiescence().await;
                    }
                    return Ok(());
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(OrchestratorError::StepFailed {
            step: step.name.clone(),
            source: last_err.expect("loop runs at least once"),
        })
    }

    fn resolve_all_placeholders(
        &self,
        workflow: &WorkflowDefinition,
        credentials: &HashMap<String, StepConfigValue>,
    ) -> Result<HashMap<String, HashMap<String, StepConfigValue>>, OrchestratorError> {
        let mut resolved = HashMap::with_capacity(workflow.steps.len());
        for (name, step) in &workflow.steps {
            let config = resolve_placeholders(&step.config, credentials).map_err(|err| {
                let TemplateError::Unresolved(placeholder) = err;
                OrchestratorError::UnresolvedPlaceholder { step: name.clone(), placeholder }
            })?;
            resolved.insert(name.clone(), config);
        }
        Ok(resolved)
    }

    async fn mark_root_running(&self, root: &QueuedJob) -> Result<(), OrchestratorError> {
        let seq = self.log_store.next_sequence(root.id).await?;
        self.log_store
            .append(JobLogEntry::status_change(root.id, seq, JobStatus::Running))
            .await?;
        self.job_store.note_status(root.id, JobStatus::Running, Utc::now()).await?;
        self.bus.publish(Event::new(
            "job.status_change",
            serde_json::json!({ "job_id": root.id, "status": "running" }),
        ));
        Ok(())
    }

    /// Idempotent: a no-op if the root already reached a terminal status
    /// (the monitor may have finalized it first on an abnormal path).
    async fn mark_root_terminal(
        &self,
        root_id: uuid::Uuid,
        status: JobStatus,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        let view = self.log_store.roll_up(root_id).await?;
        if view.status.is_terminal() {
            return Ok(());
        }
        let seq = self.log_store.next_sequence(root_id).await?;
        let entry = if reason.is_empty() {
            JobLogEntry::status_change(root_id, seq, status)
        } else {
            JobLogEntry::status_change_with_reason(root_id, seq, status, reason)
        };
        self.log_store.append(entry).await?;
        self.job_store.note_status(root_id, status, Utc::now()).await?;
        self.bus.publish(Event::new(
            "job.status_change",
            serde_json::json!({ "job_id": root_id, "status": status.to_string(), "reason": reason }),
        ));
        Ok(())
    }

    async fn log_step_failure(&self, root_id: uuid::Uuid, step_name: &str, err: &OrchestratorError) {
        if let Ok(seq) = self.log_store.next_sequence(root_id).await {
            let _ = self
                .log_store
                .append(JobLogEntry::error(root_id, seq, format!("step `{step_name}` failed: {err}")))
                .await;
        }
    }

    async fn current_view(&self, root_id: uuid::Uuid) -> Result<RuntimeView, OrchestratorError> {
        Ok(self.log_store.roll_up(root_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::queue::{InMemoryQueue, QueueConfig};
    use crate::store::{InMemoryJobLogStore, InMemoryJobStore};

    fn workflow(steps: Vec<(&str, Step)>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".to_string(),
            name: "test-workflow".to_string(),
            workflow_type: None,
            description: None,
            tags: vec![],
            schedule: None,
            timeout: Some(Duration::from_secs(5)),
            enabled: true,
            config: HashMap::new(),
            variables: HashMap::new(),
            steps: steps.into_iter().map(|(n, s)| (n.to_string(), s)).collect(),
            error_tolerance: ToleranceConfig::default(),
        }
    }

    fn step(name: &str, step_type: &str, on_error: StepErrorPolicy) -> Step {
        Step {
            name: name.to_string(),
            step_type: step_type.to_string(),
            description: None,
            config: HashMap::new(),
            on_error,
            depends: None,
            max_attempts: None,
        }
    }

    fn harness() -> (
        Arc<dyn JobStore>,
        Arc<dyn JobLogStore>,
        Arc<dyn PersistentQueue>,
        Arc<EventBus>,
        Arc<crate::pool::WorkerPool>,
    ) {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let queue = InMemoryQueue::new(QueueConfig::default(), store.clone(), logs.clone());
        let bus = EventBus::new(EventBusConfig::default());
        let registry = Arc::new(WorkerRegistry::with_builtins());
        let pool = crate::pool::WorkerPool::spawn(
            crate::pool::WorkerPoolConfig {
                poll_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            queue.clone(),
            registry,
            store.clone(),
            logs.clone(),
            bus.clone(),
        );
        (store, logs, queue, bus, pool)
    }

    #[tokio::test]
    async fn single_step_with_no_children_completes() {
        let (store, logs, queue, bus, pool) = harness();
        let registry = Arc::new(WorkerRegistry::with_builtins());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            store,
            logs,
            queue,
            bus,
            registry,
        );

        let mut cfg = HashMap::new();
        cfg.insert("prompt".to_string(), StepConfigValue::String("summarize".to_string()));
        let mut s = step("summarize", "agent", StepErrorPolicy::Fail);
        s.config = cfg;
        let wf = workflow(vec![("summarize", s)]);

        let view = orchestrator.execute(&wf, &HashMap::new()).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unresolved_placeholder_fails_before_any_job_runs() {
        let (store, logs, queue, bus, pool) = harness();
        let registry = Arc::new(WorkerRegistry::with_builtins());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            store.clone(),
            logs,
            queue,
            bus,
            registry,
        );

        let mut cfg = HashMap::new();
        cfg.insert("prompt".to_string(), StepConfigValue::String("{missing}".to_string()));
        let mut s = step("summarize", "agent", StepErrorPolicy::Fail);
        s.config = cfg;
        let wf = workflow(vec![("summarize", s)]);

        let err = orchestrator.execute(&wf, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnresolvedPlaceholder { .. }));

        let pending = store.list_by_status(JobStatus::Pending).await.unwrap();
        assert!(pending.is_empty(), "no step job should have been created");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn continue_policy_yields_partially_completed() {
        let (store, logs, queue, bus, pool) = harness();
        let registry = Arc::new(WorkerRegistry::with_builtins());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            store,
            logs,
            queue,
            bus,
            registry,
        );

        let bad = step("bad", "does_not_exist", StepErrorPolicy::Continue);
        let mut cfg = HashMap::new();
        cfg.insert("prompt".to_string(), StepConfigValue::String("ok".to_string()));
        let mut good = step("good", "agent", StepErrorPolicy::Fail);
        good.config = cfg;
        let wf = workflow(vec![("bad", bad), ("good", good)]);

        let view = orchestrator.execute(&wf, &HashMap::new()).await.unwrap();
        assert_eq!(view.status, JobStatus::PartiallyCompleted);

        pool.shutdown().await;
    }
}
