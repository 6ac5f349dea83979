use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::error;
use uuid::Uuid;

use crate::model::{AckToken, JobLogEntry, JobStatus, QueueMessage, QueuedJob};
use crate::store::{JobLogStore, JobStore};

use super::{PersistentQueue, QueueConfig, QueueError, QueueStats, Result};

/// Postgres-backed [`PersistentQueue`], matching the `queue_messages` table
/// in §6's persisted state layout. Claims use `FOR UPDATE SKIP LOCKED` so
/// concurrent pool consumers never contend on the same row.
pub struct PostgresQueue {
    pool: PgPool,
    config: QueueConfig,
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
}

impl PostgresQueue {
    pub fn new(
        pool: PgPool,
        config: QueueConfig,
        job_store: Arc<dyn JobStore>,
        log_store: Arc<dyn JobLogStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            job_store,
            log_store,
        })
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<QueueMessage> {
        let body: serde_json::Value = row.try_get("body")?;
        Ok(QueueMessage {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            body: serde_json::from_value(body).map_err(|e| QueueError::Database(e.to_string()))?,
            visible_at: row.try_get("visible_at")?,
            receive_count: row.try_get::<i32, _>("receive_count")? as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

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
}

#[async_trait]
impl PersistentQueue for PostgresQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<QueueMessage> {
        let message = QueueMessage::new(job);
        sqlx::query(
            "INSERT INTO queue_messages (id, job_id, body, visible_at, receive_count, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(message.job_id)
        .bind(serde_json::to_value(&message.body).map_err(|e| QueueError::Database(e.to_string()))?)
        .bind(message.visible_at)
        .bind(message.receive_count as i32)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<(QueueMessage, AckToken)>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let now = Utc::now();
            let next_visible = now + self.config.visibility_timeout;
            let row = sqlx::query(
                "UPDATE queue_messages SET receive_count = receive_count + 1, visible_at = $2, updated_at = $1
                 WHERE id = (
                     SELECT id FROM queue_messages
                     WHERE visible_at <= $1
                     ORDER BY visible_at, created_at
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING *",
            )
            .bind(now)
            .bind(next_visible)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => {
                    let message = Self::row_to_message(&row)?;
                    if message.receive_count > self.config.max_receive {
                        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
                            .bind(message.id)
                            .execute(&self.pool)
                            .await?;
                        self.dead_letter(message.job_id).await?;
                        continue;
                    }
                    let token = AckToken {
                        message_id: message.id,
                        receive_count: message.receive_count,
                    };
                    return Ok(Some((message, token)));
                }
                None => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn extend(&self, token: AckToken, duration: Duration) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE queue_messages SET visible_at = $1, updated_at = $1
             WHERE id = $2 AND receive_count = $3",
        )
        .bind(Utc::now() + duration)
        .bind(token.message_id)
        .bind(token.receive_count as i32)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(QueueError::StaleToken(token.message_id));
        }
        Ok(())
    }

    async fn delete(&self, token: AckToken) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND receive_count = $2")
            .bind(token.message_id)
            .bind(token.receive_count as i32)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(QueueError::StaleToken(token.message_id));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let grace = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let in_flight: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE visible_at > $1")
                    .bind(Utc::now())
                    .fetch_one(&self.pool)
                    .await?;
            if in_flight == 0 || tokio::time::Instant::now() >= grace {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE visible_at <= $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        let in_flight: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE visible_at > $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(QueueStats {
            pending: pending as usize,
            in_flight: in_flight as usize,
        })
    }
}
