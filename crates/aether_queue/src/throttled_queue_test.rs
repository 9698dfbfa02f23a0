use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

use crate::throttled_queue::{ThrottledQueue, ThrottledQueueConfig, ThrottledQueueError};

#[test]
fn zero_parameters_are_rejected() {
    for config in [
        ThrottledQueueConfig::new(0, 1_000),
        ThrottledQueueConfig::new(10, 0),
        ThrottledQueueConfig::new(10, 1_000).with_max_concurrency(0),
    ] {
        let result = ThrottledQueue::new(config);
        assert!(matches!(result, Err(ThrottledQueueError::InvalidConfig(_))));
    }
}

#[tokio::test(start_paused = true)]
async fn rate_bound_delays_excess_starts() {
    let queue = ThrottledQueue::new(ThrottledQueueConfig::new(2, 1_000)).unwrap();
    let t0 = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5_u64)
        .map(|task_index| {
            let starts = Arc::clone(&starts);
            queue.add(move || async move {
                starts.lock().unwrap().push((task_index, Instant::now()));
                sleep(Duration::from_millis(10)).await;
                task_index
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.iter().map(|(index, _)| *index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(starts[0].1, t0);
    assert_eq!(starts[1].1, t0);
    assert!(starts[2].1 >= t0 + Duration::from_millis(1_000));
    assert!(starts[3].1 >= t0 + Duration::from_millis(1_000));
    assert!(starts[4].1 >= t0 + Duration::from_millis(2_000));

    // No sliding window of the interval length contains more than two starts.
    for (window_start, window_start_time) in &starts {
        let in_window = starts
            .iter()
            .filter(|(index, time)| {
                index >= window_start
                    && *time < *window_start_time + Duration::from_millis(1_000)
            })
            .count();
        assert!(in_window <= 2);
    }
}

#[tokio::test(start_paused = true)]
async fn concurrency_bound_serializes_tasks() {
    let queue = ThrottledQueue::new(
        ThrottledQueueConfig::new(usize::MAX, 1).with_max_concurrency(1),
    )
    .unwrap();
    let t0 = Instant::now();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            queue.add(move || async move {
                let in_flight = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(in_flight, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(Instant::now() - t0 >= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn starts_are_fifo() {
    let queue = ThrottledQueue::new(
        ThrottledQueueConfig::new(usize::MAX, 1).with_max_concurrency(1),
    )
    .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..10_u64)
        .map(|task_index| {
            let order = Arc::clone(&order);
            queue.add(move || async move {
                order.lock().unwrap().push(task_index);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn size_counts_queued_tasks_only() {
    let queue = ThrottledQueue::new(
        ThrottledQueueConfig::new(usize::MAX, 1).with_max_concurrency(1),
    )
    .unwrap();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let first = queue.add(move || async move {
        let _ = release_rx.await;
    });
    let second = queue.add(|| async {});
    let third = queue.add(|| async {});

    // All three counted until the scheduler tick runs.
    assert_eq!(queue.size(), 3);

    sleep(Duration::from_millis(1)).await;
    // The first task is running, not queued.
    assert_eq!(queue.size(), 2);

    release_tx.send(()).unwrap();
    first.await.unwrap();
    second.await.unwrap();
    third.await.unwrap();
    assert_eq!(queue.size(), 0);
}

#[tokio::test(start_paused = true)]
async fn task_failure_is_isolated() {
    let queue = ThrottledQueue::new(
        ThrottledQueueConfig::new(usize::MAX, 1).with_max_concurrency(1),
    )
    .unwrap();

    let ok = queue.add(|| async { Ok::<u64, String>(1) });
    let failing = queue.add(|| async { Err::<u64, String>("task failed".to_string()) });
    let after = queue.add(|| async { Ok::<u64, String>(3) });

    assert_eq!(ok.await.unwrap(), Ok(1));
    assert_eq!(failing.await.unwrap(), Err("task failed".to_string()));
    assert_eq!(after.await.unwrap(), Ok(3));
}

#[tokio::test(start_paused = true)]
async fn dropped_queue_cancels_pending_tasks() {
    let queue = ThrottledQueue::new(ThrottledQueueConfig::new(1, 60_000)).unwrap();

    let started = queue.add(|| async { 1_u64 });
    sleep(Duration::from_millis(1)).await;
    // The second task cannot start inside the throttle window.
    let starved = queue.add(|| async { 2_u64 });
    drop(queue);

    assert_eq!(started.await.unwrap(), 1);
    assert!(matches!(starved.await, Err(ThrottledQueueError::Canceled)));
}
