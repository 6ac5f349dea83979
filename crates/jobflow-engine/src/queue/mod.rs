//! Persistent, at-least-once message queue with visibility timeouts
//! (§4.3).

mod error;
mod memory;
mod postgres;

pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use postgres::PostgresQueue;

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{AckToken, QueueMessage, QueuedJob};

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    pub max_receive: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
}

/// Durable FIFO-ish message queue (§4.3): at-least-once, crash-safe,
/// single-consumer-per-message through a visibility window.
#[async_trait]
pub trait PersistentQueue: Send + Sync {
    /// Enqueue `job` as a message, durable before returning.
    async fn enqueue(&self, job: QueuedJob) -> Result<QueueMessage>;

    /// Atomically claim the oldest visible message, or `None` if none is
    /// visible within `timeout`. Messages exceeding `max_receive` are
    /// dead-lettered internally (job marked `failed` with
    /// `exceeded_max_receive`) and never returned to a caller.
    async fn receive(&self, timeout: Duration) -> Result<Option<(QueueMessage, AckToken)>>;

    /// Push a held message's `visible_at` forward. Fails if `token` is no
    /// longer current.
    async fn extend(&self, token: AckToken, duration: Duration) -> Result<()>;

    /// Permanently remove a held message. Fails if `token` is no longer
    /// current.
    async fn delete(&self, token: AckToken) -> Result<()>;

    /// Stop accepting new receives and wait for in-flight receives to
    /// drain, up to an internal grace period.
    async fn close(&self) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;
}
