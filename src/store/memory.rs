//! In-memory storage backend.
//!
//! Non-durable; each operation mutates the tables under one lock, so the
//! all-or-nothing property of the transition transactions still holds.
//! Intended for tests and deployments that accept losing the queue on
//! restart.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::storage::{Storage, StoreError, StoreSnapshot};
use crate::records::{Assigned, Enqueued, Finished, QueueId, Scheduled, WorkerId};

#[derive(Default)]
struct Tables {
    enqueued: Vec<Enqueued>,
    scheduled: Vec<Scheduled>,
    assigned: Vec<Assigned>,
    finished: Vec<Finished>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, queue: &QueueId) -> Result<StoreSnapshot, StoreError> {
        let tables = self.tables.lock();
        Ok(StoreSnapshot {
            enqueued: tables
                .enqueued
                .iter()
                .filter(|r| &r.queue_id == queue)
                .cloned()
                .collect(),
            scheduled: tables
                .scheduled
                .iter()
                .filter(|r| &r.queue_id == queue)
                .cloned()
                .collect(),
            assigned: tables
                .assigned
                .iter()
                .filter(|r| &r.queue_id == queue)
                .cloned()
                .collect(),
        })
    }

    async fn enqueue(&self, queue: &QueueId, records: &[Enqueued]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        for record in records {
            tables
                .scheduled
                .retain(|r| !(&r.queue_id == queue && r.command_id == record.command_id));
            tables.enqueued.push(record.clone());
        }
        Ok(())
    }

    async fn schedule(&self, queue: &QueueId, records: &[Scheduled]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        for record in records {
            tables
                .assigned
                .retain(|r| !(&r.queue_id == queue && r.command_id == record.command_id));
            tables.scheduled.push(record.clone());
        }
        Ok(())
    }

    async fn assign(
        &self,
        queue: &QueueId,
        worker: WorkerId,
        next: Option<&Assigned>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables
            .assigned
            .retain(|r| !(&r.queue_id == queue && r.worker_id == worker));
        if let Some(record) = next {
            tables
                .enqueued
                .retain(|r| !(&r.queue_id == queue && r.command_id == record.command_id));
            tables.assigned.push(record.clone());
        }
        Ok(())
    }

    async fn finish(&self, queue: &QueueId, record: &Finished) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables
            .assigned
            .retain(|r| !(&r.queue_id == queue && r.command_id == record.command_id));
        tables.finished.push(record.clone());
        Ok(())
    }

    async fn finished(&self, queue: &QueueId, limit: usize) -> Result<Vec<Finished>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .finished
            .iter()
            .rev()
            .filter(|r| &r.queue_id == queue)
            .take(limit)
            .cloned()
            .collect())
    }
}
