//! Job Store and Job Log Store (§4.2, §4.4).
//!
//! Two independent services sharing one error type: the Job Store persists
//! immutable [`crate::model::QueuedJob`] records, and the Job Log Store
//! persists the append-only event log that is the sole place runtime state
//! lives durably. Both ship an in-memory backend (tests, embedders without
//! a database) and a Postgres backend matching §6's persisted state layout.

mod error;
mod job_store;
mod log_store;
mod memory;
mod postgres;

pub use error::StoreError;
pub use job_store::JobStore;
pub use log_store::JobLogStore;
pub use memory::{InMemoryJobLogStore, InMemoryJobStore};
pub use postgres::{run_migrations, PostgresJobLogStore, PostgresJobStore};

pub type Result<T> = std::result::Result<T, StoreError>;
