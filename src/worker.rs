//! Worker pull loop.
//!
//! A worker is one concurrency slot in a queue's pool. It runs as a detached
//! task that, once woken, repeatedly claims one command at a time from its
//! scheduler and delegates execution to the application's [`Executor`]. All
//! retry policy lives in the scheduler; the worker only reports outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::warn;

use crate::records::{CommandId, WorkerId};
use crate::scheduler::{QueueError, Scheduler};

/// Failure detail reported back through the Fail path.
pub type ExecuteError = Box<dyn std::error::Error + Send + Sync>;

/// The capability that actually performs a unit of work. Supplied by the
/// surrounding application; invoked exclusively from workers. Must tolerate
/// duplicate invocation: the engine guarantees at-least-once, not
/// exactly-once.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: CommandId) -> Result<(), ExecuteError>;
}

/// Handle to one worker task.
///
/// The task itself is permanent: it sleeps until started, then pulls until
/// its scheduler has nothing left for it. Wakeups coalesce, so starting a
/// worker that is already running is a no-op.
pub struct Worker {
    id: WorkerId,
    wakeup: Arc<Notify>,
}

impl Worker {
    /// Spawn the detached pull-loop task for one worker identity.
    pub(crate) fn spawn(id: WorkerId, executor: Arc<dyn Executor>, scheduler: Scheduler) -> Self {
        let wakeup = Arc::new(Notify::new());
        let notified = Arc::clone(&wakeup);
        tokio::spawn(async move {
            loop {
                notified.notified().await;
                if pull_loop(id, &executor, &scheduler).await.is_err() {
                    // Scheduler gone; the worker dies with it.
                    return;
                }
            }
        });
        Self { id, wakeup }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Begin pulling. No-op if the pull loop is already running.
    pub fn start(&self) {
        self.wakeup.notify_one();
    }
}

/// One round of pulling: claim, execute, report, until the scheduler returns
/// no work (at which point the scheduler has already returned this worker to
/// the idle pool). `Err` means the scheduler shut down.
async fn pull_loop(
    id: WorkerId,
    executor: &Arc<dyn Executor>,
    scheduler: &Scheduler,
) -> Result<(), QueueError> {
    loop {
        let command = match scheduler.dequeue(id).await {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(QueueError::Closed) => return Err(QueueError::Closed),
            Err(e) => {
                warn!(queue = %scheduler.queue_id(), worker = %id, error = %e, "Dequeue failed, worker going idle");
                return Ok(());
            }
        };

        let outcome = executor.execute(command).await;
        let report = match outcome {
            Ok(()) => scheduler.complete(command, id).await,
            Err(detail) => {
                warn!(queue = %scheduler.queue_id(), worker = %id, command = %command, error = %detail, "Execute failed");
                scheduler.fail(command, id, detail.to_string()).await
            }
        };
        if let Err(QueueError::Closed) = report {
            return Err(QueueError::Closed);
        }
        if let Err(e) = report {
            warn!(queue = %scheduler.queue_id(), worker = %id, command = %command, error = %e, "Failed to report outcome");
            return Ok(());
        }
    }
}
