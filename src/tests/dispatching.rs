//! Command-kind dispatch table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::dispatch::{CommandCatalog, Dispatcher};
use crate::records::{FinishStatus, QueueId};
use crate::store::MemoryStorage;

/// Fixed id-to-kind table, standing in for an application payload store.
struct StaticCatalog {
    kinds: HashMap<CommandId, &'static str>,
}

impl StaticCatalog {
    fn new(entries: &[(i64, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            kinds: entries
                .iter()
                .map(|&(id, kind)| (CommandId(id), kind))
                .collect(),
        })
    }
}

#[async_trait]
impl CommandCatalog for StaticCatalog {
    async fn kind_of(&self, command: CommandId) -> Result<String, ExecuteError> {
        self.kinds
            .get(&command)
            .map(|k| k.to_string())
            .ok_or_else(|| format!("unknown command {}", command).into())
    }
}

#[tokio::test]
async fn commands_route_to_their_kind_handler() {
    let emails = Arc::new(RecordingExecutor::new());
    let reports = Arc::new(RecordingExecutor::new());
    let dispatcher = Dispatcher::builder(StaticCatalog::new(&[(1, "email"), (2, "report")]))
        .handler("email", emails.clone())
        .handler("report", reports.clone())
        .build();

    dispatcher.execute(CommandId(1)).await.unwrap();
    dispatcher.execute(CommandId(2)).await.unwrap();

    assert_eq!(emails.executed(), ids(&[1]));
    assert_eq!(reports.executed(), ids(&[2]));
}

#[test]
fn builder_keeps_one_handler_per_kind() {
    let dispatcher = Dispatcher::builder(StaticCatalog::new(&[]))
        .handler("email", Arc::new(RecordingExecutor::new()))
        .handler("report", Arc::new(RecordingExecutor::new()))
        .handler("email", Arc::new(RecordingExecutor::new()))
        .build();

    let mut kinds: Vec<&str> = dispatcher.kinds().collect();
    kinds.sort_unstable();
    assert_eq!(kinds, ["email", "report"]);
}

#[tokio::test]
async fn unregistered_kind_is_an_execute_failure() {
    let dispatcher = Dispatcher::builder(StaticCatalog::new(&[(3, "cleanup")]))
        .handler("email", Arc::new(RecordingExecutor::new()))
        .build();

    let err = dispatcher.execute(CommandId(3)).await.unwrap_err();
    assert!(err.to_string().contains("no handler registered"));

    let err = dispatcher.execute(CommandId(99)).await.unwrap_err();
    assert!(err.to_string().contains("unknown command"));
}

#[tokio::test]
async fn dispatcher_drives_a_queue_end_to_end() {
    let emails = Arc::new(RecordingExecutor::new());
    let reports = Arc::new(RecordingExecutor::new());
    let dispatcher = Arc::new(
        Dispatcher::builder(StaticCatalog::new(&[(1, "email"), (2, "report")]))
            .handler("email", emails.clone())
            .handler("report", reports.clone())
            .build(),
    );

    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        dispatcher,
        test_config(),
    )
    .await
    .unwrap();

    scheduler.enqueue(ids(&[1, 2])).await.unwrap();

    assert!(wait_drained(&scheduler, Duration::from_secs(2)).await);
    assert_eq!(emails.executed(), ids(&[1]));
    assert_eq!(reports.executed(), ids(&[2]));

    let audit = scheduler.finished(10).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().all(|r| r.status == FinishStatus::Complete));
}

#[tokio::test]
async fn dispatch_failure_exhausts_like_any_other() {
    // A command whose kind resolves to nothing retries under backoff and
    // ends terminal, same as a handler error.
    let dispatcher = Arc::new(
        Dispatcher::builder(StaticCatalog::new(&[(5, "ghost")]))
            .handler("email", Arc::new(RecordingExecutor::new()))
            .build(),
    );

    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        dispatcher,
        test_config(),
    )
    .await
    .unwrap();

    scheduler.enqueue(ids(&[5])).await.unwrap();

    assert!(wait_drained(&scheduler, Duration::from_secs(5)).await);
    let audit = scheduler.finished(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].status, FinishStatus::Failed);
    assert_eq!(audit[0].try_count, 5);
    assert_eq!(
        audit[0].reason.as_deref(),
        Some("no handler registered for command kind 'ghost'")
    );
}
