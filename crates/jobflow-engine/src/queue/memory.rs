use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::model::{AckToken, JobLogEntry, JobStatus, QueueMessage, QueuedJob};
use crate::store::{JobLogStore, JobStore};

use super::{PersistentQueue, QueueConfig, QueueError, QueueStats, Result};

/// In-memory [`PersistentQueue`].
///
/// Visibility is encoded directly in `visible_at`: a message currently held
/// by a receiver has `visible_at` set in the future. This removes the need
/// for a separate "held" flag and makes visibility expiry free (just the
/// passage of time).
pub struct InMemoryQueue {
    config: QueueConfig,
    messages: RwLock<HashMap<Uuid, QueueMessage>>,
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(
        config: QueueConfig,
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            messages: RwLock::new(HashMap::new()),
            job_store,
            log_store,
            closed: AtomicBool::new(false),
        })
    }

    /// Mark `job_id`'s job `failed` with `exceeded_max_receive` (§4.3
    /// redelivery policy, §7 kind 3, §8 dead-message bound).
    async fn dead_letter(&self, job_id: Uuid) -> Result<()> {
        let seq = self.log_store.next_sequence(job_id).await?;
        self.log_store
            .append(JobLogEntry::status_change_with_reason(
                job_id,
                seq,
                JobStatus::Failed,
                "exceeded_max_receive",
            ))
            .await?;
        self.job_store
            .note_status(job_id, JobStatus::Failed, Utc::now())
            .await?;
        error!(job_id = %job_id, "message exceeded max_receive, dead-lettered");
        Ok(())
    }

    fn claim_next(&self, exclude: &[Uuid]) -> Option<(Uuid, QueueMessage, bool)> {
        let now = Utc::now();
        let mut messages = self.messages.write();
        let candidate_id = messages
            .values()
            .filter(|m| m.visible_at <= now && !exclude.contains(&m.id))
            .min_by_key(|m| (m.visible_at, m.created_at))
            .map(|m| m.id)?;

        let message = messages.get_mut(&candidate_id)?;
        message.receive_count += 1;
        message.updated_at = now;
        let exceeded = message.receive_count > self.config.max_receive;
        if exceeded {
            let dead = messages.remove(&candidate_id);
            dead.map(|m| (candidate_id, m, true))
        } else {
            message.visible_at = now + self.config.visibility_timeout;
            Some((candidate_id, message.clone(), false))
        }
    }
}

#[async_trait]
impl PersistentQueue for InMemoryQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<QueueMessage> {
        let message = QueueMessage::new(job);
        self.messages.write().insert(message.id, message.clone());
        Ok(message)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<(QueueMessage, AckToken)>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut tried = Vec::new();

        loop {
            match self.claim_next(&tried) {
                Some((_, message, true)) => {
                    self.dead_letter(message.job_id).await?;
                    tried.push(message.id);
                    continue;
                }
                Some((id, message, false)) => {
                    let token = AckToken {
                        message_id: id,
                        receive_count: message.receive_count,
                    };
                    return Ok(Some((message, token)));
                }
                None => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn extend(&self, token: AckToken, duration: Duration) -> Result<()> {
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(&token.message_id)
            .ok_or(QueueError::MessageNotFound(token.message_id))?;
        if message.receive_count != token.receive_count {
            return Err(QueueError::StaleToken(token.message_id));
        }
        message.visible_at = Utc::now() + duration;
        Ok(())
    }

    async fn delete(&self, token: AckToken) -> Result<()> {
        let mut messages = self.messages.write();
        match messages.get(&token.message_id) {
            Some(message) if message.receive_count == token.receive_count => {
                messages.remove(&token.message_id);
                Ok(())
            }
            Some(_) => Err(QueueError::StaleToken(token.message_id)),
            None => Err(QueueError::MessageNotFound(token.message_id)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let grace = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let now = Utc::now();
            let in_flight = self.messages.read().values().any(|m| m.visible_at > now);
            if !in_flight || tokio::time::Instant::now() >= grace {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let messages = self.messages.read();
        let pending = messages.values().filter(|m| m.visible_at <= now).count();
        let in_flight = messages.len() - pending;
        Ok(QueueStats { pending, in_flight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryJobLogStore, InMemoryJobStore};

    fn queue(config: QueueConfig) -> Arc<InMemoryQueue> {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        InMemoryQueue::new(config, store, logs)
    }

    #[tokio::test]
    async fn receive_then_delete_removes_message() {
        let q = queue(QueueConfig::default());
        let job = QueuedJob::root("parent", "wf");
        q.enqueue(job).await.unwrap();

        let (_msg, token) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        q.delete(token).await.unwrap();

        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn visibility_expiry_redelivers() {
        let q = queue(QueueConfig {
            visibility_timeout: Duration::from_millis(30),
            max_receive: 5,
        });
        let job = QueuedJob::root("parent", "wf");
        q.enqueue(job).await.unwrap();

        let (msg1, _token1) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let (msg2, _token2) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        assert_eq!(msg1.id, msg2.id);
        assert_eq!(msg2.receive_count, 2);
    }

    #[tokio::test]
    async fn stale_token_rejected_after_redelivery() {
        let q = queue(QueueConfig {
            visibility_timeout: Duration::from_millis(30),
            max_receive: 5,
        });
        let job = QueuedJob::root("parent", "wf");
        q.enqueue(job).await.unwrap();

        let (_msg1, token1) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        let err = q.delete(token1).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleToken(_)));
    }

    #[tokio::test]
    async fn exceeding_max_receive_dead_letters_the_job() {
        let logs = InMemoryJobLogStore::new();
        let store = InMemoryJobStore::new(logs.clone());
        let q = InMemoryQueue::new(
            QueueConfig {
                visibility_timeout: Duration::from_millis(10),
                max_receive: 2,
            },
            store.clone(),
            logs.clone(),
        );

        let job = QueuedJob::root("parent", "wf");
        let job_id = job.id;
        store.create(job.clone()).await.unwrap();
        q.enqueue(job).await.unwrap();

        for _ in 0..2 {
            let _ = q.receive(Duration::from_millis(50)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        // third attempt exceeds max_receive and dead-letters instead of returning.
        let result = q.receive(Duration::from_millis(50)).await.unwrap();
        assert!(result.is_none());

        let view = logs.roll_up(job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("exceeded_max_receive"));
    }
}
