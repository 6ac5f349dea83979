use thiserror::Error;

/// Errors a [`crate::workers::StepWorker`] can raise, matching the error
/// taxonomy in §4.6 and §7.
#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    /// `validate`/`create_jobs`: the step's config does not meet the
    /// worker's schema.
    #[error("invalid config for field `{field}`: {message}")]
    InvalidConfig { field: String, message: String },

    /// `create_jobs`: failed to persist a job or enqueue a message.
    #[error("io error: {0}")]
    Io(String),

    /// `execute`: transient failure; the message becomes visible again
    /// (§7 kind 3).
    #[error("retryable: {0}")]
    Retryable(String),

    /// `execute`: the unit cannot succeed; marked `failed` immediately
    /// (§7 kind 4).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl WorkerError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        WorkerError::Io(message.into())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        WorkerError::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        WorkerError::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Retryable(_))
    }
}

impl From<crate::store::StoreError> for WorkerError {
    fn from(err: crate::store::StoreError) -> Self {
        WorkerError::Io(err.to_string())
    }
}

impl From<crate::queue::QueueError> for WorkerError {
    fn from(err: crate::queue::QueueError) -> Self {
        WorkerError::Io(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no worker registered for step type `{0}`")]
    UnknownStepType(String),

    #[error("duplicate worker registration for step type `{0}`")]
    DuplicateStepType(String),
}
