//! Scheduler, worker and placement scenario tests.
//!
//! Module organization:
//! - `scheduling.rs` - enqueue/dequeue round trips, deferred scheduling
//! - `retry.rs` - backoff-driven retry and try exhaustion
//! - `recovery.rs` - orphaned-assignment recovery on activation
//! - `events.rs` - transition event stream
//! - `dispatching.rs` - command-kind dispatch table
//! - `placement.rs` - one live scheduler per queue id

mod dispatching;
mod events;
mod retry;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

pub(crate) use crate::backoff::BackoffPolicy;
pub(crate) use crate::records::CommandId;
pub(crate) use crate::scheduler::{Scheduler, SchedulerConfig};
pub(crate) use crate::worker::{ExecuteError, Executor};

/// Tight intervals so deferred work promotes quickly under test. Also makes
/// sure a subscriber is installed so `RUST_LOG` works while debugging tests.
pub(crate) fn test_config() -> SchedulerConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    SchedulerConfig {
        workers: 4,
        max_try_count: 5,
        tick_interval: Duration::from_millis(20),
        backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
    }
}

pub(crate) fn ids(raw: &[i64]) -> Vec<CommandId> {
    raw.iter().map(|&i| CommandId(i)).collect()
}

/// Executor that records every invocation and can be told to fail the first
/// N attempts of a command.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    executed: Mutex<Vec<CommandId>>,
    failures: Mutex<HashMap<CommandId, u32>>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` executions of `command`.
    pub(crate) fn fail_times(&self, command: CommandId, times: u32) {
        self.failures.lock().insert(command, times);
    }

    pub(crate) fn executed(&self) -> Vec<CommandId> {
        self.executed.lock().clone()
    }

    pub(crate) fn execution_count(&self, command: CommandId) -> usize {
        self.executed.lock().iter().filter(|&&c| c == command).count()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, command: CommandId) -> Result<(), ExecuteError> {
        self.executed.lock().push(command);
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&command) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err("synthetic failure".into());
            }
        }
        Ok(())
    }
}

/// Poll a condition until it holds or the deadline passes.
pub(crate) async fn wait_until(deadline: Duration, probe: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Poll until the queue holds no live records: everything submitted has
/// reached a terminal state and all claims are released.
pub(crate) async fn wait_drained(scheduler: &Scheduler, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if let Ok(stats) = scheduler.stats().await {
            if stats.queued == 0 && stats.scheduled == 0 && stats.assigned == 0 {
                return true;
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Poll until the whole pool has reported idle. Workers park via their own
/// dequeue call, which can land after the last completion.
pub(crate) async fn wait_idle(scheduler: &Scheduler, workers: usize, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if let Ok(stats) = scheduler.stats().await {
            if stats.idle_workers == workers {
                return true;
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}
