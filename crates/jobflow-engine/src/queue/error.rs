use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("ack token for message {0} is no longer current")]
    StaleToken(Uuid),

    #[error("queue is closed")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}
