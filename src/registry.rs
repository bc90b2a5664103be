//! In-process scheduler placement.
//!
//! At most one live scheduler may exist per queue id. For non-distributed
//! deployments that guarantee is an in-process map: the registry spawns a
//! scheduler the first time a queue id is seen and hands out clones of its
//! handle afterwards. Distributed placement (locks, leases, sharding) is the
//! hosting environment's concern.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::records::QueueId;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::{Storage, StoreError};
use crate::worker::Executor;

/// One live scheduler per queue id, all sharing one storage backend and one
/// executor.
pub struct SchedulerRegistry {
    storage: Arc<dyn Storage>,
    executor: Arc<dyn Executor>,
    config: SchedulerConfig,
    // tokio Mutex: held across the spawn await so two callers cannot race
    // into activating the same queue twice
    schedulers: Mutex<HashMap<QueueId, Scheduler>>,
}

impl SchedulerRegistry {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            config,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the queue's scheduler, spawning it on first use.
    pub async fn scheduler(&self, queue_id: &QueueId) -> Result<Scheduler, StoreError> {
        let mut schedulers = self.schedulers.lock().await;
        if let Some(existing) = schedulers.get(queue_id) {
            return Ok(existing.clone());
        }

        let scheduler = Scheduler::spawn(
            queue_id.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.executor),
            self.config.clone(),
        )
        .await?;
        info!(queue = %queue_id, "Queue activated");
        schedulers.insert(queue_id.clone(), scheduler.clone());
        Ok(scheduler)
    }

    /// Number of live schedulers.
    pub async fn len(&self) -> usize {
        self.schedulers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.schedulers.lock().await.is_empty()
    }

    /// Shut down every scheduler and forget it.
    pub async fn shutdown_all(&self) {
        let mut schedulers = self.schedulers.lock().await;
        for (queue_id, scheduler) in schedulers.drain() {
            scheduler.shutdown().await;
            info!(queue = %queue_id, "Queue deactivated");
        }
    }
}
