//! SQLite storage backend.
//!
//! Embedded persistence with WAL mode; one transaction per state transition.
//! A single file can carry any number of queues, addressed by `queue_id`.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use super::migration;
use super::storage::{Storage, StoreError, StoreSnapshot};
use crate::records::{
    Assigned, CommandId, Enqueued, FinishStatus, Finished, QueueId, Scheduled, WorkerId,
};

/// SQLite storage configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Enable WAL mode (recommended)
    pub wal_mode: bool,
    /// Synchronous mode: 0=OFF, 1=NORMAL, 2=FULL
    pub synchronous: i32,
    /// Cache size in pages (negative = KB)
    pub cache_size: i32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("requeue.db"),
            wal_mode: true,
            synchronous: 1, // NORMAL
            cache_size: -16000,
        }
    }
}

impl SqliteConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let path = std::env::var("DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("requeue.db"));

        let synchronous = std::env::var("SQLITE_SYNCHRONOUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let cache_size = std::env::var("SQLITE_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(-16000);

        Self {
            path,
            wal_mode: true,
            synchronous,
            cache_size,
        }
    }
}

/// SQLite storage backend.
pub struct SqliteStorage {
    /// Database connection (Mutex: transitions are serialized per queue
    /// already, the lock only guards cross-queue sharing of one file)
    conn: Mutex<Connection>,
    pub path: PathBuf,
}

impl SqliteStorage {
    /// Open (or create) the database and run migrations.
    pub fn new(config: SqliteConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(&config.path)?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA synchronous = {};
             PRAGMA cache_size = {};
             PRAGMA temp_store = MEMORY;",
            if config.wal_mode { "WAL" } else { "DELETE" },
            config.synchronous,
            config.cache_size,
        ))?;

        migration::migrate(&conn)?;

        info!(path = %config.path.display(), "SQLite initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            path: config.path,
        })
    }

    /// Open with configuration taken from environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(SqliteConfig::from_env())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, queue: &QueueId) -> Result<StoreSnapshot, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT command_id, try_count, enqueued_at FROM enqueued
             WHERE queue_id = ?1 ORDER BY seq",
        )?;
        let enqueued = stmt
            .query_map(params![queue.as_str()], |row| {
                Ok(Enqueued {
                    queue_id: queue.clone(),
                    command_id: CommandId(row.get(0)?),
                    try_count: row.get(1)?,
                    enqueued_at: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT command_id, try_count, run_at FROM scheduled
             WHERE queue_id = ?1 ORDER BY seq",
        )?;
        let scheduled = stmt
            .query_map(params![queue.as_str()], |row| {
                Ok(Scheduled {
                    queue_id: queue.clone(),
                    command_id: CommandId(row.get(0)?),
                    try_count: row.get(1)?,
                    run_at: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT command_id, worker_id, try_count, assigned_at FROM assigned
             WHERE queue_id = ?1",
        )?;
        let assigned = stmt
            .query_map(params![queue.as_str()], |row| {
                Ok(Assigned {
                    queue_id: queue.clone(),
                    command_id: CommandId(row.get(0)?),
                    worker_id: WorkerId(row.get(1)?),
                    try_count: row.get(2)?,
                    assigned_at: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreSnapshot {
            enqueued,
            scheduled,
            assigned,
        })
    }

    async fn enqueue(&self, queue: &QueueId, records: &[Enqueued]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        for record in records {
            tx.execute(
                "DELETE FROM scheduled WHERE queue_id = ?1 AND command_id = ?2",
                params![queue.as_str(), record.command_id.0],
            )?;
            tx.execute(
                "INSERT INTO enqueued (queue_id, command_id, try_count, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    queue.as_str(),
                    record.command_id.0,
                    record.try_count,
                    record.enqueued_at as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn schedule(&self, queue: &QueueId, records: &[Scheduled]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        for record in records {
            tx.execute(
                "DELETE FROM assigned WHERE queue_id = ?1 AND command_id = ?2",
                params![queue.as_str(), record.command_id.0],
            )?;
            tx.execute(
                "INSERT INTO scheduled (queue_id, command_id, try_count, run_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    queue.as_str(),
                    record.command_id.0,
                    record.try_count,
                    record.run_at as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn assign(
        &self,
        queue: &QueueId,
        worker: WorkerId,
        next: Option<&Assigned>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM assigned WHERE queue_id = ?1 AND worker_id = ?2",
            params![queue.as_str(), worker.0],
        )?;
        if let Some(record) = next {
            tx.execute(
                "DELETE FROM enqueued WHERE queue_id = ?1 AND command_id = ?2",
                params![queue.as_str(), record.command_id.0],
            )?;
            tx.execute(
                "INSERT INTO assigned (queue_id, command_id, worker_id, try_count, assigned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    queue.as_str(),
                    record.command_id.0,
                    record.worker_id.0,
                    record.try_count,
                    record.assigned_at as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn finish(&self, queue: &QueueId, record: &Finished) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM assigned WHERE queue_id = ?1 AND command_id = ?2",
            params![queue.as_str(), record.command_id.0],
        )?;
        tx.execute(
            "INSERT INTO finished (queue_id, command_id, try_count, finished_at, status, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                queue.as_str(),
                record.command_id.0,
                record.try_count,
                record.finished_at as i64,
                record.status.to_string(),
                record.reason,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn finished(&self, queue: &QueueId, limit: usize) -> Result<Vec<Finished>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT command_id, try_count, finished_at, status, reason FROM finished
             WHERE queue_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![queue.as_str(), limit as i64], |row| {
                let status: String = row.get(3)?;
                Ok(Finished {
                    queue_id: queue.clone(),
                    command_id: CommandId(row.get(0)?),
                    try_count: row.get(1)?,
                    finished_at: row.get::<_, i64>(2)? as u64,
                    status: if status == "failed" {
                        FinishStatus::Failed
                    } else {
                        FinishStatus::Complete
                    },
                    reason: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
