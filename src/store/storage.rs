//! Storage backend abstraction for command lifecycle records.
//!
//! Each trait method is one atomic, durable transaction. Transactionality
//! exists for crash consistency; a backend is only ever mutated by the single
//! scheduler owning the queue, so no multi-writer coordination is required.

use std::fmt;

use async_trait::async_trait;

use crate::records::{Assigned, Enqueued, Finished, QueueId, Scheduled, WorkerId};

/// Storage error type.
#[derive(Debug)]
pub enum StoreError {
    /// SQLite error
    Sqlite(rusqlite::Error),
    /// Generic backend error
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            StoreError::Other(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

/// Persisted live state of one queue, as read back at startup. Finished
/// records are write-only audit history and are not part of the snapshot.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// FIFO order preserved.
    pub enqueued: Vec<Enqueued>,
    /// Insertion order preserved.
    pub scheduled: Vec<Scheduled>,
    pub assigned: Vec<Assigned>,
}

/// Durable, partition-key-addressable backend. One method per state
/// transition so each transition commits as a single transaction.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Read back the live records of a queue.
    async fn load(&self, queue: &QueueId) -> Result<StoreSnapshot, StoreError>;

    /// Delete any Scheduled rows for these command ids and insert the given
    /// Enqueued rows at the FIFO tail, in order.
    async fn enqueue(&self, queue: &QueueId, records: &[Enqueued]) -> Result<(), StoreError>;

    /// Delete any Assigned rows for these command ids and insert the given
    /// Scheduled rows.
    async fn schedule(&self, queue: &QueueId, records: &[Scheduled]) -> Result<(), StoreError>;

    /// Delete any Assigned rows held by `worker` (a worker holds at most one
    /// live claim); if `next` is given, also delete its Enqueued row and
    /// insert the claim.
    async fn assign(
        &self,
        queue: &QueueId,
        worker: WorkerId,
        next: Option<&Assigned>,
    ) -> Result<(), StoreError>;

    /// Delete the Assigned row for the command and append the terminal
    /// Finished record.
    async fn finish(&self, queue: &QueueId, record: &Finished) -> Result<(), StoreError>;

    /// Bounded page of the Finished audit trail, most recent first.
    async fn finished(&self, queue: &QueueId, limit: usize) -> Result<Vec<Finished>, StoreError>;
}
