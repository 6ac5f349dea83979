//! Binary entry point: wires the engine together from environment
//! configuration, loads a workflow definition, runs the orchestrator to
//! completion, and tears down cleanly on `ctrl_c` or workflow exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobflow_engine::prelude::*;
use jobflow_engine::EngineConfig;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn engine_config_from_env() -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        worker_pool_size: env_usize("JOBFLOW_WORKER_POOL_SIZE", defaults.worker_pool_size),
        queue_poll_timeout: env_duration_ms("JOBFLOW_QUEUE_POLL_TIMEOUT_MS", defaults.queue_poll_timeout),
        visibility_timeout: env_duration_ms("JOBFLOW_VISIBILITY_TIMEOUT_MS", defaults.visibility_timeout),
        max_receive: env_u32("JOBFLOW_MAX_RECEIVE", defaults.max_receive),
        monitor_scan_period: env_duration_ms("JOBFLOW_MONITOR_SCAN_PERIOD_MS", defaults.monitor_scan_period),
        workflow_default_timeout: env_duration_ms(
            "JOBFLOW_WORKFLOW_DEFAULT_TIMEOUT_MS",
            defaults.workflow_default_timeout,
        ),
        default_tolerance: defaults.default_tolerance,
    }
}

/// Backend handles assembled for either the in-memory or Postgres store
/// (§6 Persisted state layout); both sides implement the same traits so
/// everything downstream is backend-agnostic.
struct Backend {
    job_store: Arc<dyn JobStore>,
    log_store: Arc<dyn JobLogStore>,
    queue: Arc<dyn PersistentQueue>,
}

async fn assemble_backend(config: &EngineConfig) -> anyhow::Result<Backend> {
    let queue_config = QueueConfig {
        visibility_timeout: config.visibility_timeout,
        max_receive: config.max_receive,
    };

    match std::env::var("JOBFLOW_DATABASE_URL") {
        Ok(database_url) => {
            info!("connecting to postgres backend");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.worker_pool_size as u32 + 2)
                .connect(&database_url)
                .await
                .context("failed to connect to JOBFLOW_DATABASE_URL")?;
            jobflow_engine::store::run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;

            let log_store: Arc<dyn JobLogStore> = jobflow_engine::store::PostgresJobLogStore::new(pool.clone());
            let job_store: Arc<dyn JobStore> =
                jobflow_engine::store::PostgresJobStore::new(pool.clone(), log_store.clone());
            let queue: Arc<dyn PersistentQueue> =
                jobflow_engine::queue::PostgresQueue::new(pool, queue_config, job_store.clone(), log_store.clone());

            Ok(Backend { job_store, log_store, queue })
        }
        Err(_) => {
            info!("JOBFLOW_DATABASE_URL not set, using in-memory backend");
            let log_store: Arc<dyn JobLogStore> = jobflow_engine::store::InMemoryJobLogStore::new();
            let job_store: Arc<dyn JobStore> = jobflow_engine::store::InMemoryJobStore::new(log_store.clone());
            let queue: Arc<dyn PersistentQueue> =
                jobflow_engine::queue::InMemoryQueue::new(queue_config, job_store.clone(), log_store.clone());

            Ok(Backend { job_store, log_store, queue })
        }
    }
}

fn load_workflow(path: &str) -> anyhow::Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading workflow file {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing workflow file {path}"))
}

fn load_credentials() -> HashMap<String, StepConfigValue> {
    let Ok(path) = std::env::var("JOBFLOW_CREDENTIALS_PATH") else {
        return HashMap::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            error!(path = %path, error = %err, "failed to parse credentials file, continuing with none");
            HashMap::new()
        }),
        Err(err) => {
            error!(path = %path, error = %err, "failed to read credentials file, continuing with none");
            HashMap::new()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobflow=debug")))
        .init();

    let config = engine_config_from_env();
    let workflow_path =
        std::env::var("JOBFLOW_WORKFLOW_PATH").context("JOBFLOW_WORKFLOW_PATH must be set")?;
    let workflow = load_workflow(&workflow_path)?;
    let credentials = load_credentials();

    let backend = assemble_backend(&config).await?;
    let bus = EventBus::new(EventBusConfig::default());
    let registry = Arc::new(WorkerRegistry::with_builtins());

    let pool = WorkerPool::spawn(
        WorkerPoolConfig {
            size: config.worker_pool_size,
            poll_timeout: config.queue_poll_timeout,
            visibility_timeout: config.visibility_timeout,
            ..Default::default()
        },
        backend.queue.clone(),
        registry.clone(),
        backend.job_store.clone(),
        backend.log_store.clone(),
        bus.clone(),
    );

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            monitor_scan_period: config.monitor_scan_period,
            workflow_default_timeout: config.workflow_default_timeout,
            default_tolerance: config.default_tolerance,
            ..Default::default()
        },
        backend.job_store.clone(),
        backend.log_store.clone(),
        backend.queue.clone(),
        bus.clone(),
        registry,
    );

    info!(workflow = %workflow.name, path = %workflow_path, "starting workflow");

    let result = tokio::select! {
        result = orchestrator.execute(&workflow, &credentials) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl_c received, shutting down");
            pool.shutdown().await;
            return Ok(());
        }
    };

    pool.shutdown().await;

    match result {
        Ok(view) => {
            info!(status = %view.status, "workflow finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "workflow failed");
            Err(err.into())
        }
    }
}
