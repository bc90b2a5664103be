//! Transition event stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use super::*;
use crate::records::{QueueId, TransitionEvent, TransitionKind};
use crate::store::MemoryStorage;

/// Drain events until one of the given kind arrives (inclusive).
async fn collect_until(
    rx: &mut broadcast::Receiver<TransitionEvent>,
    last: TransitionKind,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transition event")
            .expect("event stream closed");
        let done = event.kind == last;
        events.push(event);
        if done {
            return events;
        }
    }
}

#[tokio::test]
async fn lifecycle_emits_one_event_per_transition() {
    let executor = Arc::new(RecordingExecutor::new());
    let config = SchedulerConfig {
        workers: 1,
        ..test_config()
    };
    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        executor,
        config,
    )
    .await
    .unwrap();

    let mut rx = scheduler.subscribe();
    scheduler.enqueue(ids(&[1])).await.unwrap();

    let events = collect_until(&mut rx, TransitionKind::Completed).await;
    let kinds: Vec<TransitionKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            TransitionKind::Enqueued,
            TransitionKind::Assigned,
            TransitionKind::Completed,
        ]
    );

    assert!(events.iter().all(|e| e.command_id == CommandId(1)));
    assert!(events.iter().all(|e| e.queue_id == QueueId::from("q")));
    assert_eq!(events[0].worker_id, None);
    assert_eq!(events[1].worker_id, Some(crate::records::WorkerId(0)));
    assert!(events.iter().all(|e| e.try_count == 0));
}

#[tokio::test]
async fn retry_emits_scheduled_with_bumped_try_count() {
    let executor = Arc::new(RecordingExecutor::new());
    executor.fail_times(CommandId(4), 1);
    let config = SchedulerConfig {
        workers: 1,
        ..test_config()
    };
    let scheduler = Scheduler::spawn(
        QueueId::from("q"),
        Arc::new(MemoryStorage::new()),
        executor,
        config,
    )
    .await
    .unwrap();

    let mut rx = scheduler.subscribe();
    scheduler.enqueue(ids(&[4])).await.unwrap();

    let events = collect_until(&mut rx, TransitionKind::Completed).await;
    let kinds: Vec<TransitionKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            TransitionKind::Enqueued,
            TransitionKind::Assigned,
            TransitionKind::Scheduled,
            TransitionKind::Enqueued,
            TransitionKind::Assigned,
            TransitionKind::Completed,
        ]
    );

    // The failure bumped the try count, and it sticks for the rest of the
    // lifecycle.
    let tries: Vec<u32> = events.iter().map(|e| e.try_count).collect();
    assert_eq!(tries, [0, 0, 1, 1, 1, 1]);
    // The retry's Scheduled transition names the worker that failed
    assert!(events[2].worker_id.is_some());
}

#[tokio::test]
async fn events_serialize_with_lowercase_kind() {
    let event = TransitionEvent {
        queue_id: QueueId::from("orders"),
        command_id: CommandId(42),
        worker_id: Some(crate::records::WorkerId(1)),
        try_count: 2,
        timestamp: 1_700_000_000_000,
        kind: TransitionKind::Scheduled,
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["queue_id"], "orders");
    assert_eq!(json["command_id"], 42);
    assert_eq!(json["worker_id"], 1);
    assert_eq!(json["try_count"], 2);
    assert_eq!(json["kind"], "scheduled");
}
