//! Integration tests for core-async on the Tokio runtime.

use core_async::race::{deadline, deadline_or_cancel, Outcome};
use core_async::sync::{self, CancellationToken};
use core_async::{task, time};
use std::sync::Arc;

#[core_async::test]
async fn test_spawn_blocking_runs_file_io() {
    let dir = std::env::temp_dir();
    let handle = task::spawn_blocking(move || std::fs::metadata(dir).map(|m| m.is_dir()));
    let is_dir = handle.await.unwrap().unwrap();
    assert!(is_dir);
}

#[core_async::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_cancellation_token_propagates_to_children() {
    let parent = CancellationToken::new();
    let child = parent.child_token();

    let waiter = task::spawn(async move {
        child.cancelled().await;
        "stopped"
    });

    parent.cancel();
    assert_eq!(waiter.await.unwrap(), "stopped");
}

#[core_async::test]
async fn test_deadline_with_spawned_work() {
    let handle = task::spawn(async {
        time::sleep(time::Duration::from_millis(5)).await;
        11
    });

    let outcome = deadline(time::Duration::from_secs(1), handle).await;
    match outcome {
        Outcome::Completed(Ok(value)) => assert_eq!(value, 11),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[core_async::test]
async fn test_deadline_or_cancel_times_out() {
    let token = CancellationToken::new();
    let outcome = deadline_or_cancel(
        time::Duration::from_millis(10),
        &token,
        time::sleep(time::Duration::from_secs(5)),
    )
    .await;

    assert_eq!(outcome, Outcome::TimedOut);
    assert!(!token.is_cancelled());
}

#[core_async::test]
async fn test_watch_channel_keeps_latest_value() {
    let (tx, mut rx) = sync::watch::channel(0u32);

    task::spawn(async move {
        for value in 1..=3 {
            tx.send(value).unwrap();
            task::yield_now().await;
        }
    });

    while *rx.borrow() < 3 {
        if rx.changed().await.is_err() {
            break;
        }
    }
    assert_eq!(*rx.borrow(), 3);
}

#[core_async::test]
async fn test_mutex_shared_between_tasks() {
    let counter = Arc::new(sync::Mutex::new(0));
    let mut handles = Vec::new();

    for _ in 0..5 {
        let counter = counter.clone();
        handles.push(task::spawn(async move {
            *counter.lock().await += 1;
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*counter.lock().await, 5);
}

#[test]
fn test_time_utilities() {
    let now_millis = time::now_millis();
    let now_secs = time::now_secs();

    assert!(now_millis > 0);
    assert!(now_millis / 1000 >= now_secs - 1);

    let before_epoch = time::UNIX_EPOCH - time::Duration::from_millis(1500);
    assert_eq!(time::system_time_to_millis(before_epoch), -1500);
    assert_eq!(
        time::system_time_to_millis(time::UNIX_EPOCH + time::Duration::from_millis(42)),
        42
    );
}
