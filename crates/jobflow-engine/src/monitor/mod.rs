//! Per-parent aggregator combining event subscriptions with a periodic
//! authoritative re-scan of the Job Log Store (§4.9).
//!
//! Because every job this engine creates attaches directly to its
//! workflow's root (see [`crate::workers`] module docs), "the monitored
//! root's children" and "the monitored root's full descendant subtree" are
//! the same set — the re-scan never needs to recurse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::model::{JobLogEntry, JobStatus};
use crate::store::{JobLogStore, JobStore};

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("monitor for {0} timed out")]
    Timeout(Uuid),
}

/// Action taken when `max_child_failures` is exceeded (§4.8 tolerance
/// thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    StopAll,
    #[default]
    Continue,
    MarkWarning,
}

/// Workflow-level `{max_child_failures, failure_action}` policy consulted
/// by the Monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub max_child_failures: u32,
    pub failure_action: FailureAction,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            max_child_failures: u32::MAX,
            failure_action: FailureAction::Continue,
        }
    }
}

/// Aggregated counters for a monitored parent's descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub result_count: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn is_quiescent(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Why a monitor stopped watching its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All steps were dispatched and every descendant reached a terminal
    /// state; the orchestrator writes the root's own terminal status.
    Quiescent,
    /// `max_child_failures` was exceeded under `failure_action = stop_all`;
    /// the monitor itself wrote `failed` to the root and cancelled the rest.
    ToleranceExceeded,
    /// The hard lifetime cap elapsed; the monitor wrote `failed` with
    /// `monitor_timeout` to the root.
    TimedOut,
}

struct Inner {
    root_id: Uuid,
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
    bus: Arc<EventBus>,
    tolerance: ToleranceConfig,
    counters: parking_lot::RwLock<Counters>,
    dispatched: AtomicBool,
    stopped: AtomicBool,
    stop_reason: parking_lot::Mutex<Option<StopReason>>,
    notify: Notify,
}

/// One Monitor per active parent (§4.9).
pub struct Monitor {
    inner: Arc<Inner>,
    scan_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Start monitoring `root_id`. Spawns a periodic re-scan task and
    /// subscribes to `job.*`/`document.*` events carrying a matching
    /// `parent_id`; both paths funnel into the same re-scan logic.
    pub fn spawn(
        root_id: Uuid,
        tolerance: ToleranceConfig,
        scan_period: Duration,
        hard_timeout: Duration,
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let inner = Arc::new(Inner {
            root_id,
            job_store,
            log_store,
            bus: bus.clone(),
            tolerance,
            counters: parking_lot::RwLock::new(Counters::default()),
            dispatched: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_reason: parking_lot::Mutex::new(None),
            notify: Notify::new(),
        });

        let event_inner = inner.clone();
        let handler_result = bus.subscribe(
            "job.*",
            Arc::new(move |event| {
                let inner = event_inner.clone();
                Box::pin(async move {
                    if event.parent_id() == Some(inner.root_id) || event.job_id() == Some(inner.root_id) {
                        Inner::rescan(&inner).await;
                    }
                    Ok(())
                })
            }),
        );
        if let Err(err) = handler_result {
            warn!(error = %err, "monitor failed to subscribe to job.* events");
        }

        let event_inner = inner.clone();
        let handler_result = bus.subscribe(
            "document.*",
            Arc::new(move |event| {
                let inner = event_inner.clone();
                Box::pin(async move {
                    if event.parent_id() == Some(inner.root_id) {
                        Inner::rescan(&inner).await;
                    }
                    Ok(())
                })
            }),
        );
        if let Err(err) = handler_result {
            warn!(error = %err, "monitor failed to subscribe to document.* events");
        }

        let scan_inner = inner.clone();
        let deadline = Instant::now() + hard_timeout;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Inner::rescan(&scan_inner).await;
                        if scan_inner.stopped.load(Ordering::Acquire) {
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        if !scan_inner.stopped.load(Ordering::Acquire) {
                            Inner::finalize_timeout(&scan_inner).await;
                        }
                        return;
                    }
                }
            }
        });

        Arc::new(Self {
            inner,
            scan_task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Tell the monitor no further steps will create new descendants. Once
    /// set, the next quiescent re-scan stops the monitor with
    /// [`StopReason::Quiescent`] instead of continuing to watch.
    pub fn all_steps_dispatched(&self) {
        self.inner.dispatched.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Block until every descendant reaches a terminal state, or until
    /// the monitor stops for another reason (tolerance exceeded, timeout).
    pub async fn wait_for_quiescence(&self) -> (Counters, Option<StopReason>) {
        loop {
            let notified = self.inner.notify.notified();
            {
                let counters = *self.inner.counters.read();
                if counters.is_quiescent() || self.inner.stopped.load(Ordering::Acquire) {
                    return (counters, *self.inner.stop_reason.lock());
                }
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> Counters {
        *self.inner.counters.read()
    }

    /// Re-scan synchronously and return the fresh counters. Callers that
    /// just created new descendants (the orchestrator, right after
    /// `create_jobs`) use this to avoid racing the background scan/event
    /// tasks before checking quiescence.
    pub async fn force_rescan(&self) -> Counters {
        Inner::rescan(&self.inner).await;
        self.snapshot()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.inner.stop_reason.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Cancel every non-terminal descendant of the monitored root (§4.9
    /// Cancellation).
    pub async fn cancel(&self) -> Result<()> {
        Inner::cancel_descendants(&self.inner, "cancelled").await?;
        Ok(())
    }

    /// Abort the background tasks without writing any further state.
    pub fn abort(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
        self.inner.notify.notify_waiters();
    }
}

impl Inner {
    async fn rescan(inner: &Arc<Inner>) {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }

        let children = match inner.job_store.list_children(inner.root_id).await {
            Ok(children) => children,
            Err(err) => {
                warn!(root = %inner.root_id, error = %err, "monitor rescan failed to list children");
                return;
            }
        };

        let mut counters = Counters::default();
        for child in &children {
            let view = match inner.log_store.roll_up(child.id).await {
                Ok(view) => view,
                Err(err) => {
                    warn!(job_id = %child.id, error = %err, "monitor rescan failed to roll up child");
                    continue;
                }
            };
            match view.status {
                JobStatus::Pending => counters.pending += 1,
                JobStatus::Running => counters.running += 1,
                JobStatus::Completed => {
                    counters.completed += 1;
                    counters.result_count += 1;
                }
                JobStatus::Failed => counters.failed += 1,
                JobStatus::Cancelled => counters.cancelled += 1,
                JobStatus::PartiallyCompleted => counters.completed += 1,
            }
        }

        *inner.counters.write() = counters;
        inner.bus.publish(crate::model::Event::new(
            "job.progress",
            serde_json::json!({
                "job_id": inner.root_id,
                "parent_id": inner.root_id,
                "counters": counters,
            }),
        ));

        if inner.tolerance.failure_action == FailureAction::StopAll
            && counters.failed > u64::from(inner.tolerance.max_child_failures)
            && !inner.stopped.load(Ordering::Acquire)
        {
            Self::finalize_tolerance_exceeded(inner).await;
            return;
        }

        if inner.dispatched.load(Ordering::Acquire) && counters.is_quiescent() {
            inner.stopped.store(true, Ordering::Release);
            *inner.stop_reason.lock() = Some(StopReason::Quiescent);
        }

        inner.notify.notify_waiters();
    }

    async fn cancel_descendants(inner: &Arc<Inner>, reason: &str) -> Result<()> {
        let children = inner.job_store.list_children(inner.root_id).await?;
        for child in children {
            let view = inner.log_store.roll_up(child.id).await?;
            if view.status.is_terminal() {
                continue;
            }
            let seq = inner.log_store.next_sequence(child.id).await?;
            inner
                .log_store
                .append(JobLogEntry::status_change_with_reason(
                    child.id,
                    seq,
                    JobStatus::Cancelled,
                    reason,
                ))
                .await?;
            inner
                .job_store
                .note_status(child.id, JobStatus::Cancelled, Utc::now())
                .await?;
            inner.bus.publish(crate::model::Event::new(
                "job.status_change",
                serde_json::json!({
                    "job_id": child.id,
                    "parent_id": inner.root_id,
                    "status": "cancelled",
                    "reason": reason,
                }),
            ));
        }
        Ok(())
    }

    async fn finalize_tolerance_exceeded(inner: &Arc<Inner>) {
        if let Err(err) = Self::cancel_descendants(inner, "error_tolerance_exceeded").await {
            error!(root = %inner.root_id, error = %err, "failed to cancel descendants on tolerance exceeded");
        }
        if let Err(err) = Self::finalize_root(inner, JobStatus::Failed, "error_tolerance_exceeded").await {
            error!(root = %inner.root_id, error = %err, "failed to finalize root on tolerance exceeded");
        }
        inner.stopped.store(true, Ordering::Release);
        *inner.stop_reason.lock() = Some(StopReason::ToleranceExceeded);
        inner.notify.notify_waiters();
    }

    async fn finalize_timeout(inner: &Arc<Inner>) {
        error!(root = %inner.root_id, "monitor hard timeout elapsed");
        if let Err(err) = Self::cancel_descendants(inner, "monitor_timeout").await {
            error!(root = %inner.root_id, error = %err, "failed to cancel descendants on monitor timeout");
        }
        if let Err(err) = Self::finalize_root(inner, JobStatus::Failed, "monitor_timeout").await {
            error!(root = %inner.root_id, error = %err, "failed to finalize root on monitor timeout");
        }
        inner.stopped.store(true, Ordering::Release);
        *inner.stop_reason.lock() = Some(StopReason::TimedOut);
        inner.notify.notify_waiters();
    }

    async fn finalize_root(inner: &Arc<Inner>, status: JobStatus, reason: &str) -> Result<()> {
        let view = inner.log_store.roll_up(inner.root_id).await?;
        if view.status.is_terminal() {
            return Ok(());
        }
        let seq = inner.log_store.next_sequence(inner.root_id).await?;
        inner
            .log_store
            .append(JobLogEntry::status_change_with_reason(
                inner.root_id,
                seq,
                status,
                reason,
            ))
            .await?;
        inner.job_store.note_status(inner.root_id, status, Utc::now()).await?;
        inner.bus.publish(crate::model::Event::new(
            "job.status_change",
            serde_json::json!({ "job_id": inner.root_id, "status": status.to_string(), "reason": reason }),
        ));
        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
    }
}
