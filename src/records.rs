//! Command lifecycle records and transition events.
//!
//! A command occupies exactly one of the three live record kinds
//! ([`Enqueued`], [`Scheduled`], [`Assigned`]) at any instant. [`Finished`]
//! records are terminal and accumulate as an append-only audit trail.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current timestamp in milliseconds since the Unix epoch.
#[inline(always)]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Names one independent queue and its single owning scheduler/store pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(pub String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        QueueId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(s: &str) -> Self {
        QueueId(s.to_string())
    }
}

/// Opaque identifier of one unit of work. The engine never interprets the
/// payload behind it; resolution is the executor's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub i64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identity of one concurrency slot within a queue's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub i64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ready to run, served FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub queue_id: QueueId,
    pub command_id: CommandId,
    pub try_count: u32,
    pub enqueued_at: u64,
}

/// Deferred until `run_at` passes; invisible to workers until promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduled {
    pub queue_id: QueueId,
    pub command_id: CommandId,
    pub try_count: u32,
    pub run_at: u64,
}

/// Claimed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assigned {
    pub queue_id: QueueId,
    pub command_id: CommandId,
    pub worker_id: WorkerId,
    pub try_count: u32,
    pub assigned_at: u64,
}

/// Terminal outcome of a command attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishStatus {
    Complete,
    Failed,
}

impl fmt::Display for FinishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishStatus::Complete => f.write_str("complete"),
            FinishStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Terminal, append-only audit record. Never revisited by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finished {
    pub queue_id: QueueId,
    pub command_id: CommandId,
    pub try_count: u32,
    pub finished_at: u64,
    pub status: FinishStatus,
    pub reason: Option<String>,
}

/// Kind of a state transition, for the observability surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enqueued,
    Scheduled,
    Assigned,
    Completed,
    Failed,
}

/// One structured event per committed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub queue_id: QueueId,
    pub command_id: CommandId,
    pub worker_id: Option<WorkerId>,
    pub try_count: u32,
    pub timestamp: u64,
    pub kind: TransitionKind,
}
