//! Backoff-driven retry and try exhaustion.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::*;
use crate::records::{FinishStatus, QueueId};
use crate::store::MemoryStorage;

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let executor = Arc::new(RecordingExecutor::new());
    executor.fail_times(CommandId(3), 2);
    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        executor.clone(),
        test_config(),
    )
    .await
    .unwrap();

    scheduler.enqueue(ids(&[3])).await.unwrap();

    assert!(wait_drained(&scheduler, Duration::from_secs(5)).await);
    assert_eq!(executor.execution_count(CommandId(3)), 3);

    let audit = scheduler.finished(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].command_id, CommandId(3));
    assert_eq!(audit[0].status, FinishStatus::Complete);
    // Two retries happened before the success
    assert_eq!(audit[0].try_count, 2);
    assert_eq!(audit[0].reason, None);
}

#[tokio::test]
async fn exhausted_tries_end_in_terminal_failure() {
    let executor = Arc::new(RecordingExecutor::new());
    executor.fail_times(CommandId(7), u32::MAX);
    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        executor.clone(),
        test_config(),
    )
    .await
    .unwrap();

    scheduler.enqueue(ids(&[7])).await.unwrap();

    assert!(wait_drained(&scheduler, Duration::from_secs(5)).await);

    // Initial attempt plus max_try_count retries
    assert_eq!(executor.execution_count(CommandId(7)), 6);

    let audit = scheduler.finished(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].status, FinishStatus::Failed);
    assert_eq!(audit[0].try_count, 5);
    assert_eq!(audit[0].reason.as_deref(), Some("synthetic failure"));
}

#[tokio::test]
async fn retry_waits_out_the_backoff_delay() {
    let executor = Arc::new(RecordingExecutor::new());
    executor.fail_times(CommandId(1), 1);
    let config = SchedulerConfig {
        backoff: BackoffPolicy::fixed(Duration::from_secs(10)),
        ..test_config()
    };
    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        executor.clone(),
        config,
    )
    .await
    .unwrap();

    scheduler.enqueue(ids(&[1])).await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        executor.execution_count(CommandId(1)) == 1
    })
    .await);

    // The retry sits in Scheduled until the delay passes; many ticks later it
    // still has not run again.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.execution_count(CommandId(1)), 1);
    let stats = scheduler.stats().await.unwrap();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.assigned, 0);

    scheduler.shutdown().await;
}
