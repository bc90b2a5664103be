//! Single-owner scheduler, one instance per queue.
//!
//! The scheduler is an actor task: every mutation of a queue's state is
//! funneled through its mailbox and strictly serialized, so the store never
//! sees concurrent writers. Workers run in parallel with each other and with
//! the promotion tick, but each of their store-visible effects (dequeue,
//! complete, fail) is one call into this actor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::backoff::BackoffPolicy;
use crate::records::{
    now_ms, CommandId, Finished, QueueId, TransitionEvent, TransitionKind, WorkerId,
};
use crate::store::{QueueStore, Storage, StoreError};
use crate::worker::{Executor, Worker};

/// Scheduler configuration. Backoff policies are explicit values, chosen per
/// queue at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub workers: usize,
    /// A failure whose next attempt number would exceed this is terminal.
    pub max_try_count: u32,
    /// Promotion tick interval. Bounds the extra latency added to any
    /// scheduled delay.
    pub tick_interval: Duration,
    /// Delay policy for retries.
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_try_count: 5,
            tick_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::fibonacci(Duration::from_secs(5), Duration::from_secs(300)),
        }
    }
}

/// Queue operation error.
#[derive(Debug)]
pub enum QueueError {
    /// The store transaction did not commit.
    Store(StoreError),
    /// The scheduler has shut down.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Store(e) => write!(f, "store error: {}", e),
            QueueError::Closed => f.write_str("scheduler is closed"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        QueueError::Store(e)
    }
}

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub scheduled: usize,
    pub assigned: usize,
    pub idle_workers: usize,
}

enum Msg {
    Enqueue {
        commands: Vec<CommandId>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Schedule {
        run_at: u64,
        commands: Vec<CommandId>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Dequeue {
        worker: WorkerId,
        reply: oneshot::Sender<Result<Option<CommandId>, StoreError>>,
    },
    Complete {
        command: CommandId,
        worker: WorkerId,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Fail {
        command: CommandId,
        worker: WorkerId,
        reason: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    Audit {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<Finished>, StoreError>>,
    },
    Shutdown,
}

/// Cheap cloneable handle to one queue's scheduler actor.
///
/// Submission calls (`enqueue`, `schedule_*`) return only after the backing
/// store transaction committed; their errors propagate to the caller, who
/// must retry or escalate.
///
/// Dropping every external handle does not stop the queue: the worker tasks
/// hold handles of their own, so the actor and its workers run until
/// [`shutdown`](Scheduler::shutdown) is called. That is the only teardown
/// path.
#[derive(Clone)]
pub struct Scheduler {
    queue_id: QueueId,
    tx: mpsc::Sender<Msg>,
    events: broadcast::Sender<TransitionEvent>,
}

impl Scheduler {
    /// Load the queue's persisted state and spawn its scheduler actor.
    ///
    /// Activation recovers orphaned assignments: every claim still recorded
    /// from a previous run is routed through the Fail path with reason
    /// "orphaned on restart". A claim never survives a scheduler restart.
    pub async fn spawn(
        queue_id: QueueId,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
    ) -> Result<Scheduler, StoreError> {
        let backend = storage.name();
        let mut store = QueueStore::new(queue_id.clone(), storage);
        store.load().await?;
        info!(queue = %queue_id, backend, "Queue state loaded");

        let (tx, rx) = mpsc::channel(128);
        let (events, _) = broadcast::channel(1024);
        let handle = Scheduler {
            queue_id: queue_id.clone(),
            tx,
            events: events.clone(),
        };

        let actor = SchedulerActor {
            queue_id,
            store,
            idle: Vec::with_capacity(config.workers),
            workers: HashMap::new(),
            pool_size: config.workers,
            max_try_count: config.max_try_count,
            tick_interval: config.tick_interval,
            backoff: config.backoff,
            executor,
            events,
            handle: handle.clone(),
            rx,
        };
        tokio::spawn(actor.run());

        Ok(handle)
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    /// Submit commands as immediately runnable. Returns after durable commit.
    pub async fn enqueue(&self, commands: Vec<CommandId>) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Enqueue { commands, reply }).await?;
        recv(rx).await
    }

    /// Defer commands until the given epoch-milliseconds instant. A due time
    /// already in the past enqueues directly.
    pub async fn schedule_at(
        &self,
        run_at: u64,
        commands: Vec<CommandId>,
    ) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Schedule {
            run_at,
            commands,
            reply,
        })
        .await?;
        recv(rx).await
    }

    /// Defer commands by a relative delay.
    pub async fn schedule_after(
        &self,
        delay: Duration,
        commands: Vec<CommandId>,
    ) -> Result<(), QueueError> {
        self.schedule_at(now_ms() + delay.as_millis() as u64, commands)
            .await
    }

    /// Claim the next command for a worker. Returning `None` parks the
    /// worker back in the idle pool; this pull is how the scheduler learns a
    /// worker has gone idle.
    pub async fn dequeue(&self, worker: WorkerId) -> Result<Option<CommandId>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Dequeue { worker, reply }).await?;
        recv(rx).await
    }

    /// Report successful execution of a claimed command.
    pub async fn complete(&self, command: CommandId, worker: WorkerId) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Complete {
            command,
            worker,
            reply,
        })
        .await?;
        recv(rx).await
    }

    /// Report failed execution. The scheduler either schedules a retry under
    /// the backoff policy or, once tries are exhausted, records a terminal
    /// failure.
    pub async fn fail(
        &self,
        command: CommandId,
        worker: WorkerId,
        reason: String,
    ) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Fail {
            command,
            worker,
            reason,
            reply,
        })
        .await?;
        recv(rx).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Stats { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Bounded page of the Finished audit trail, most recent first.
    pub async fn finished(&self, limit: usize) -> Result<Vec<Finished>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Audit { limit, reply }).await?;
        recv(rx).await
    }

    /// Subscribe to the stream of committed state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. In-flight executions finish reporting into a closed
    /// mailbox and their claims are recovered as orphans on the next spawn.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown).await;
    }

    async fn send(&self, msg: Msg) -> Result<(), QueueError> {
        self.tx.send(msg).await.map_err(|_| QueueError::Closed)
    }
}

async fn recv<T>(rx: oneshot::Receiver<Result<T, StoreError>>) -> Result<T, QueueError> {
    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(QueueError::Store(e)),
        Err(_) => Err(QueueError::Closed),
    }
}

struct SchedulerActor {
    queue_id: QueueId,
    store: QueueStore,
    /// LIFO stack of idle worker identities.
    idle: Vec<WorkerId>,
    workers: HashMap<WorkerId, Worker>,
    pool_size: usize,
    max_try_count: u32,
    tick_interval: Duration,
    backoff: BackoffPolicy,
    executor: Arc<dyn Executor>,
    events: broadcast::Sender<TransitionEvent>,
    handle: Scheduler,
    rx: mpsc::Receiver<Msg>,
}

impl SchedulerActor {
    async fn run(mut self) {
        for i in 0..self.pool_size as i64 {
            let worker = Worker::spawn(WorkerId(i), Arc::clone(&self.executor), self.handle.clone());
            self.idle.push(worker.id());
            self.workers.insert(worker.id(), worker);
        }

        self.recover_orphans().await;
        // Enqueued records recovered from a previous run are already
        // runnable; without this they would wait for a submission.
        self.dispatch_idle();

        info!(
            queue = %self.queue_id,
            workers = self.pool_size,
            queued = self.store.queued_len(),
            scheduled = self.store.scheduled_len(),
            "Scheduler started"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                msg = self.rx.recv() => match msg {
                    Some(Msg::Enqueue { commands, reply }) => {
                        let _ = reply.send(self.on_enqueue(&commands).await);
                    }
                    Some(Msg::Schedule { run_at, commands, reply }) => {
                        let _ = reply.send(self.on_schedule(run_at, &commands).await);
                    }
                    Some(Msg::Dequeue { worker, reply }) => {
                        let _ = reply.send(self.on_dequeue(worker).await);
                    }
                    Some(Msg::Complete { command, worker, reply }) => {
                        let _ = reply.send(self.on_complete(command, worker).await);
                    }
                    Some(Msg::Fail { command, worker, reason, reply }) => {
                        let _ = reply.send(self.on_fail(command, worker, &reason).await);
                    }
                    Some(Msg::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Msg::Audit { limit, reply }) => {
                        let _ = reply.send(self.store.finished(limit).await);
                    }
                    Some(Msg::Shutdown) | None => break,
                }
            }
        }

        // Wake sleeping workers so their tasks observe the closed mailbox
        // and exit.
        for worker in self.workers.values() {
            worker.start();
        }
        info!(queue = %self.queue_id, "Scheduler stopped");
    }

    /// Fail every claim left over from a previous run. The commands re-enter
    /// the normal retry path instead of being silently dropped.
    async fn recover_orphans(&mut self) {
        let orphans = self.store.assigned_snapshot();
        if orphans.is_empty() {
            return;
        }
        info!(queue = %self.queue_id, count = orphans.len(), "Recovering orphaned assignments");
        for orphan in orphans {
            if let Err(e) = self
                .on_fail(orphan.command_id, orphan.worker_id, "orphaned on restart")
                .await
            {
                error!(
                    queue = %self.queue_id,
                    command = %orphan.command_id,
                    error = %e,
                    "Orphan recovery failed, record stays assigned until next restart"
                );
            }
        }
    }

    /// Promotion tick: the only mechanism by which deferred work becomes
    /// runnable. Storage errors are non-fatal here; the same commands are
    /// still due on the next tick.
    async fn on_tick(&mut self) {
        let due = self.store.get_scheduled(now_ms());
        if !due.is_empty() {
            if let Err(e) = self.on_enqueue(&due).await {
                error!(queue = %self.queue_id, error = %e, "Promotion tick failed, retrying next tick");
            }
        }
        // A transient dequeue error parks the worker with work still
        // queued; the tick picks that back up.
        self.dispatch_idle();
    }

    async fn on_enqueue(&mut self, commands: &[CommandId]) -> Result<(), StoreError> {
        let records = self.store.enqueue(commands).await?;
        for record in &records {
            self.emit(TransitionKind::Enqueued, record.command_id, None, record.try_count);
        }
        self.dispatch_idle();
        Ok(())
    }

    async fn on_schedule(&mut self, run_at: u64, commands: &[CommandId]) -> Result<(), StoreError> {
        if run_at <= now_ms() {
            return self.on_enqueue(commands).await;
        }
        let records = self.store.schedule(run_at, commands).await?;
        for record in &records {
            self.emit(TransitionKind::Scheduled, record.command_id, None, record.try_count);
        }
        Ok(())
    }

    async fn on_dequeue(&mut self, worker: WorkerId) -> Result<Option<CommandId>, StoreError> {
        match self.store.assign(worker).await {
            Ok(Some(claim)) => {
                self.emit(
                    TransitionKind::Assigned,
                    claim.command_id,
                    Some(worker),
                    claim.try_count,
                );
                Ok(Some(claim.command_id))
            }
            Ok(None) => {
                self.park(worker);
                Ok(None)
            }
            Err(e) => {
                self.park(worker);
                Err(e)
            }
        }
    }

    async fn on_complete(&mut self, command: CommandId, worker: WorkerId) -> Result<(), StoreError> {
        let record = self.store.complete(command, worker).await?;
        self.emit(TransitionKind::Completed, command, Some(worker), record.try_count);
        Ok(())
    }

    /// Retry under backoff, or record a terminal failure once the next
    /// attempt number would exceed the configured maximum.
    async fn on_fail(
        &mut self,
        command: CommandId,
        worker: WorkerId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let try_count = self.store.assigned_try_count(command).unwrap_or(0);
        let attempt = try_count + 1;

        if attempt > self.max_try_count {
            let record = self.store.fail(command, worker, reason).await?;
            self.emit(TransitionKind::Failed, command, Some(worker), record.try_count);
            info!(
                queue = %self.queue_id,
                command = %command,
                tries = record.try_count,
                reason = %reason,
                "Command failed permanently"
            );
            return Ok(());
        }

        // Schedule the retry: records the new attempt count and clears the
        // stale claim in one transaction. The promotion tick makes it
        // runnable once the delay passes.
        let delay = self.backoff.next(attempt);
        let records = self
            .store
            .schedule(now_ms() + delay.as_millis() as u64, &[command])
            .await?;
        for record in &records {
            self.emit(
                TransitionKind::Scheduled,
                record.command_id,
                Some(worker),
                record.try_count,
            );
        }
        Ok(())
    }

    /// Dispatch idle workers while runnable work exists. Fire-and-forget:
    /// a started worker pulls on its own task; the scheduler does not wait.
    fn dispatch_idle(&mut self) {
        while self.store.queued_len() > 0 {
            let Some(id) = self.idle.pop() else { break };
            if let Some(worker) = self.workers.get(&id) {
                worker.start();
            }
        }
    }

    /// Return a worker to the idle pool. Wakeups coalesce, so a worker can
    /// report idle once more than it was started; the pool stays duplicate
    /// free.
    fn park(&mut self, worker: WorkerId) {
        if !self.idle.contains(&worker) {
            self.idle.push(worker);
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.store.queued_len(),
            scheduled: self.store.scheduled_len(),
            assigned: self.store.assigned_len(),
            idle_workers: self.idle.len(),
        }
    }

    fn emit(
        &self,
        kind: TransitionKind,
        command: CommandId,
        worker: Option<WorkerId>,
        try_count: u32,
    ) {
        let _ = self.events.send(TransitionEvent {
            queue_id: self.queue_id.clone(),
            command_id: command,
            worker_id: worker,
            try_count,
            timestamp: now_ms(),
            kind,
        });
    }
}
