//! requeue - durable per-queue work scheduling.
//!
//! Each queue is a single-owner scheduler that mediates between a durable
//! command store and a small pool of pull-based workers. Commands are
//! identified units of work; the engine guarantees at-least-once execution,
//! bounded worker concurrency, deferred scheduling and backoff-driven retry.
//! What a command actually does is supplied by the application through the
//! [`Executor`](worker::Executor) capability.
//!
//! ## Module Organization
//!
//! - `records.rs` - Command lifecycle records and transition events
//! - `backoff.rs` - Retry backoff policies (fixed, linear, Fibonacci)
//! - `store/` - Durable state-transition store with in-memory mirror
//! - `scheduler.rs` - Single-owner scheduler actor, one per queue
//! - `worker.rs` - Worker pull loop and the Executor capability
//! - `dispatch.rs` - Static command-kind dispatch table
//! - `registry.rs` - One live scheduler per queue id, in-process

pub mod backoff;
pub mod dispatch;
pub mod records;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod worker;

#[cfg(test)]
mod tests;

pub use backoff::BackoffPolicy;
pub use dispatch::{CommandCatalog, Dispatcher};
pub use records::{
    Assigned, CommandId, Enqueued, FinishStatus, Finished, QueueId, Scheduled, TransitionEvent,
    TransitionKind, WorkerId,
};
pub use registry::SchedulerRegistry;
pub use scheduler::{QueueError, QueueStats, Scheduler, SchedulerConfig};
pub use store::{
    MemoryStorage, QueueStore, SqliteConfig, SqliteStorage, Storage, StoreError, StoreSnapshot,
};
pub use worker::{ExecuteError, Executor, Worker};
