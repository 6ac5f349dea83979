//! Crate-wide error type for engine operations that don't have a more
//! specific error enum of their own (see [`crate::store::StoreError`],
//! [`crate::queue::QueueError`], [`crate::workers::WorkerError`],
//! [`crate::orchestrator::OrchestratorError`]).

use thiserror::Error;

/// Result alias for top-level engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),

    #[error(transparent)]
    Bus(#[from] crate::bus::BusError),

    #[error(transparent)]
    Registry(#[from] crate::workers::RegistryError),

    #[error(transparent)]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }
}
