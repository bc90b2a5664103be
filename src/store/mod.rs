//! Durable state-transition store with an in-memory mirror.
//!
//! ## Module Organization
//!
//! - `storage.rs` - Storage trait, StoreError, StoreSnapshot
//! - `sqlite.rs` - SQLite backend (WAL, one transaction per transition)
//! - `migration.rs` - schema creation
//! - `memory.rs` - in-memory backend for tests and non-durable deployments

mod memory;
mod migration;
mod sqlite;
mod storage;


pub use memory::MemoryStorage;
pub use sqlite::{SqliteConfig, SqliteStorage};
pub use storage::{Storage, StoreError, StoreSnapshot};

use std::collections::VecDeque;
use std::sync::Arc;

use crate::records::{
    now_ms, Assigned, CommandId, Enqueued, FinishStatus, Finished, QueueId, Scheduled, WorkerId,
};

/// Transactional ledger of command lifecycle state for one queue, plus an
/// in-memory mirror of the persisted truth.
///
/// Every transition commits one backend transaction first; the mirror is
/// updated only after the commit and is never written to independently, so it
/// cannot diverge from committed state. A `QueueStore` is owned and mutated
/// by exactly one scheduler, never shared.
pub struct QueueStore {
    queue_id: QueueId,
    backend: Arc<dyn Storage>,
    queued: VecDeque<Enqueued>,
    scheduled: Vec<Scheduled>,
    assigned: Vec<Assigned>,
}

impl QueueStore {
    pub fn new(queue_id: QueueId, backend: Arc<dyn Storage>) -> Self {
        Self {
            queue_id,
            backend,
            queued: VecDeque::new(),
            scheduled: Vec::new(),
            assigned: Vec::new(),
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    /// Hydrate the mirror from the persisted Assigned, Enqueued and Scheduled
    /// sets. Finished records are write-only and not loaded.
    pub async fn load(&mut self) -> Result<(), StoreError> {
        let snapshot = self.backend.load(&self.queue_id).await?;
        self.queued = snapshot.enqueued.into();
        self.scheduled = snapshot.scheduled;
        self.assigned = snapshot.assigned;
        Ok(())
    }

    /// Append commands to the FIFO tail in call order. A command with a live
    /// Scheduled record carries its try count forward; anything else starts
    /// at zero.
    pub async fn enqueue(&mut self, commands: &[CommandId]) -> Result<Vec<Enqueued>, StoreError> {
        let enqueued_at = now_ms();
        let records: Vec<Enqueued> = commands
            .iter()
            .map(|&command_id| Enqueued {
                queue_id: self.queue_id.clone(),
                command_id,
                try_count: self
                    .scheduled
                    .iter()
                    .find(|s| s.command_id == command_id)
                    .map(|s| s.try_count)
                    .unwrap_or(0),
                enqueued_at,
            })
            .collect();

        self.backend.enqueue(&self.queue_id, &records).await?;

        for record in &records {
            self.scheduled.retain(|s| s.command_id != record.command_id);
            self.queued.push_back(record.clone());
        }
        Ok(records)
    }

    /// Defer commands until `run_at`. A command with a live Assigned record
    /// (a retry) carries its try count forward plus one; anything else starts
    /// at zero.
    pub async fn schedule(
        &mut self,
        run_at: u64,
        commands: &[CommandId],
    ) -> Result<Vec<Scheduled>, StoreError> {
        let records: Vec<Scheduled> = commands
            .iter()
            .map(|&command_id| Scheduled {
                queue_id: self.queue_id.clone(),
                command_id,
                try_count: self
                    .assigned
                    .iter()
                    .find(|a| a.command_id == command_id)
                    .map(|a| a.try_count + 1)
                    .unwrap_or(0),
                run_at,
            })
            .collect();

        self.backend.schedule(&self.queue_id, &records).await?;

        for record in &records {
            self.assigned.retain(|a| a.command_id != record.command_id);
            self.scheduled.push(record.clone());
        }
        Ok(records)
    }

    /// Claim the FIFO head for a worker. Any stale claim held by the worker
    /// from a previous round is cleared first, whether or not new work
    /// exists.
    pub async fn assign(&mut self, worker: WorkerId) -> Result<Option<Assigned>, StoreError> {
        let next = self.queued.front().map(|head| Assigned {
            queue_id: self.queue_id.clone(),
            command_id: head.command_id,
            worker_id: worker,
            try_count: head.try_count,
            assigned_at: now_ms(),
        });

        self.backend
            .assign(&self.queue_id, worker, next.as_ref())
            .await?;

        self.assigned.retain(|a| a.worker_id != worker);
        if let Some(ref record) = next {
            self.queued.pop_front();
            self.assigned.push(record.clone());
        }
        Ok(next)
    }

    /// Convert the command's claim into a terminal Complete record.
    pub async fn complete(
        &mut self,
        command: CommandId,
        _worker: WorkerId,
    ) -> Result<Finished, StoreError> {
        self.finish(command, FinishStatus::Complete, None).await
    }

    /// Convert the command's claim into a terminal Failed record.
    pub async fn fail(
        &mut self,
        command: CommandId,
        _worker: WorkerId,
        reason: &str,
    ) -> Result<Finished, StoreError> {
        self.finish(command, FinishStatus::Failed, Some(reason.to_string()))
            .await
    }

    async fn finish(
        &mut self,
        command: CommandId,
        status: FinishStatus,
        reason: Option<String>,
    ) -> Result<Finished, StoreError> {
        let record = Finished {
            queue_id: self.queue_id.clone(),
            command_id: command,
            try_count: self
                .assigned
                .iter()
                .find(|a| a.command_id == command)
                .map(|a| a.try_count)
                .unwrap_or(0),
            finished_at: now_ms(),
            status,
            reason,
        };

        self.backend.finish(&self.queue_id, &record).await?;

        self.assigned.retain(|a| a.command_id != command);
        Ok(record)
    }

    /// Scheduled commands due at `now`, ordered by run time ascending with
    /// ties broken by insertion order. Read-only; mutates nothing.
    pub fn get_scheduled(&self, now: u64) -> Vec<CommandId> {
        let mut due: Vec<&Scheduled> = self
            .scheduled
            .iter()
            .filter(|s| s.run_at <= now)
            .collect();
        due.sort_by_key(|s| s.run_at);
        due.iter().map(|s| s.command_id).collect()
    }

    /// Bounded page of the Finished audit trail, most recent first.
    pub async fn finished(&self, limit: usize) -> Result<Vec<Finished>, StoreError> {
        self.backend.finished(&self.queue_id, limit).await
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn assigned_len(&self) -> usize {
        self.assigned.len()
    }

    /// Try count of a live claim, if the command is currently assigned.
    pub fn assigned_try_count(&self, command: CommandId) -> Option<u32> {
        self.assigned
            .iter()
            .find(|a| a.command_id == command)
            .map(|a| a.try_count)
    }

    /// Snapshot of all live claims. Used by restart recovery.
    pub fn assigned_snapshot(&self) -> Vec<Assigned> {
        self.assigned.clone()
    }
}
