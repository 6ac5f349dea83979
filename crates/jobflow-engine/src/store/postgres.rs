use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::{self, JobLogEntry, JobStatus, LogKind, QueuedJob, RuntimeView};

use super::{JobLogStore, JobStore, Result, StoreError};

/// Postgres-backed [`JobStore`], matching the `jobs` table in §6's
/// persisted state layout.
pub struct PostgresJobStore {
    pool: PgPool,
    log_store: Arc<dyn JobLogStore>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, log_store: Arc<dyn JobLogStore>) -> Arc<Self> {
        Arc::new(Self { pool, log_store })
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<QueuedJob> {
        let config: serde_json::Value = row.try_get("config")?;
        let metadata: serde_json::Value = row.try_get("metadata")?;
        Ok(QueuedJob {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            job_type: row.try_get("job_type")?,
            name: row.try_get("name")?,
            config: serde_json::from_value(config)?,
            metadata: serde_json::from_value(metadata)?,
            created_at: row.try_get("created_at")?,
            depth: row.try_get::<i32, _>("depth")? as u32,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: QueuedJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, parent_id, job_type, name, config, metadata, created_at, depth, status, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $7)",
        )
        .bind(job.id)
        .bind(job.parent_id)
        .bind(&job.job_type)
        .bind(&job.name)
        .bind(serde_json::to_value(&job.config)?)
        .bind(serde_json::to_value(&job.metadata)?)
        .bind(job.created_at)
        .bind(job.depth as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_child(&self, parent_id: Uuid, job: QueuedJob) -> Result<()> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::ParentNotFound(parent_id));
        }
        self.create(job).await
    }

    async fn get(&self, id: Uuid) -> Result<QueuedJob> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(id))?;
        Self::row_to_job(&row)
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE parent_id = $1 ORDER BY created_at")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = $1")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs
             WHERE status NOT IN ('completed', 'failed', 'cancelled', 'partially_completed')
               AND updated_at < $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let descendants: Vec<Uuid> = sqlx::query_scalar(
            "WITH RECURSIVE tree AS (
                SELECT id FROM jobs WHERE id = $1
                UNION ALL
                SELECT j.id FROM jobs j JOIN tree t ON j.parent_id = t.id
             )
             SELECT id FROM tree",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        for job_id in &descendants {
            self.log_store.delete_for_job(*job_id).await?;
        }
        sqlx::query("DELETE FROM jobs WHERE id = ANY($1)")
            .bind(&descendants)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn note_status(&self, id: Uuid, status: JobStatus, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query("UPDATE jobs SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.to_string())
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }
}

/// Postgres-backed [`JobLogStore`], matching the `job_logs` table in §6's
/// persisted state layout (keyed by `(job_id, sequence)` with a secondary
/// index on `job_id`).
pub struct PostgresJobLogStore {
    pool: PgPool,
}

impl PostgresJobLogStore {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<JobLogEntry> {
        let kind: String = row.try_get("kind")?;
        let payload: serde_json::Value = row.try_get("payload")?;
        Ok(JobLogEntry {
            job_id: row.try_get("job_id")?,
            sequence: row.try_get::<i64, _>("sequence")? as u64,
            kind: parse_kind(&kind)?,
            payload,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

fn parse_kind(raw: &str) -> Result<LogKind> {
    Ok(match raw {
        "status_change" => LogKind::StatusChange,
        "progress" => LogKind::Progress,
        "error" => LogKind::Error,
        "info" => LogKind::Info,
        "warn" => LogKind::Warn,
        "debug" => LogKind::Debug,
        other => return Err(StoreError::Serialization(format!("unknown log kind `{other}`"))),
    })
}

fn kind_str(kind: LogKind) -> &'static str {
    match kind {
        LogKind::StatusChange => "status_change",
        LogKind::Progress => "progress",
        LogKind::Error => "error",
        LogKind::Info => "info",
        LogKind::Warn => "warn",
        LogKind::Debug => "debug",
    }
}

#[async_trait]
impl JobLogStore for PostgresJobLogStore {
    async fn append(&self, entry: JobLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_logs (job_id, sequence, kind, payload, timestamp)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (job_id, sequence) DO NOTHING",
        )
        .bind(entry.job_id)
        .bind(entry.sequence as i64)
        .bind(kind_str(entry.kind))
        .bind(&entry.payload)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read(&self, job_id: Uuid, from_sequence: u64, limit: usize) -> Result<Vec<JobLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM job_logs WHERE job_id = $1 AND sequence >= $2 ORDER BY sequence LIMIT $3",
        )
        .bind(job_id)
        .bind(from_sequence as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn roll_up(&self, job_id: Uuid) -> Result<RuntimeView> {
        let entries = self.read(job_id, 0, i64::MAX as usize).await?;
        Ok(model::roll_up_bare(job_id, &entries))
    }

    async fn next_sequence(&self, job_id: Uuid) -> Result<u64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM job_logs WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|m| m as u64 + 1).unwrap_or(0))
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM job_logs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Run the embedded migrations (`jobflow-engine/migrations/`) against
/// `pool`, creating `jobs` and `job_logs` if absent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))
}
