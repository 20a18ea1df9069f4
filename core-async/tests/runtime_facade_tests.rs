//! Behaviour of the runtime facade as the gallery core relies on it.

use core_async::{fs, sync, task, time};
use std::sync::Arc;

#[core_async::test]
async fn spawned_tasks_return_their_output() {
    let handle = task::spawn(async { 7 * 6 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[core_async::test]
async fn blocking_work_runs_off_the_executor() {
    let bytes = task::spawn_blocking(|| {
        std::thread::sleep(std::time::Duration::from_millis(5));
        vec![1u8; 16]
    })
    .await
    .unwrap();
    assert_eq!(bytes.len(), 16);
}

#[core_async::test]
async fn timeout_elapses_for_slow_futures() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
    })
    .await;
    assert!(result.is_err());

    let fast = time::timeout(time::Duration::from_millis(200), async { 1 }).await;
    assert_eq!(fast.unwrap(), 1);
}

#[core_async::test]
async fn cancellation_propagates_to_child_tokens() {
    let parent = sync::CancellationToken::new();
    let child = parent.child_token();

    let waiter = task::spawn(async move {
        child.cancelled().await;
        "stopped"
    });

    time::sleep(time::Duration::from_millis(5)).await;
    parent.cancel();
    assert_eq!(waiter.await.unwrap(), "stopped");
}

#[core_async::test]
async fn select_on_cancellation_stops_long_work() {
    let token = sync::CancellationToken::new();
    let worker_token = token.clone();
    let processed = Arc::new(sync::Mutex::new(0usize));
    let counter = processed.clone();

    let worker = task::spawn(async move {
        loop {
            step_unless_cancelled(&worker_token, &counter).await;
            if worker_token.is_cancelled() {
                break;
            }
        }
    });

    time::sleep(time::Duration::from_millis(20)).await;
    token.cancel();
    worker.await.unwrap();
    assert!(*processed.lock().await > 0);
}

async fn step_unless_cancelled(token: &sync::CancellationToken, counter: &sync::Mutex<usize>) {
    let step = time::sleep(time::Duration::from_millis(1));
    futures::pin_mut!(step);
    let cancelled = token.cancelled();
    futures::pin_mut!(cancelled);
    if let futures::future::Either::Left(_) = futures::future::select(step, cancelled).await {
        *counter.lock().await += 1;
    }
}

#[core_async::test]
async fn watch_channel_delivers_latest_progress() {
    let (tx, mut rx) = sync::watch::channel(0.0f32);

    task::spawn(async move {
        for step in [0.25f32, 0.5, 1.0] {
            time::sleep(time::Duration::from_millis(2)).await;
            tx.send(step).unwrap();
        }
    });

    let mut last = 0.0;
    while rx.changed().await.is_ok() {
        last = *rx.borrow();
        if last >= 1.0 {
            break;
        }
    }
    assert_eq!(last, 1.0);
}

#[core_async::test]
async fn fs_exists_reports_missing_paths() {
    let dir = std::env::temp_dir().join(format!("core-async-{}", time::now_millis()));
    assert!(!fs::exists(&dir).await);
    fs::create_dir_all(&dir).await.unwrap();
    assert!(fs::exists(&dir).await);
    fs::remove_dir_all(&dir).await.unwrap();
}
