use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;

use crate::retry::{call_with_retry, RetryConfig};

fn quick_config(max_retries: usize) -> RetryConfig {
    RetryConfig { max_retries, min_delay_ms: 1_000, max_delay_ms: 60_000, backoff_factor: 2.0 }
}

#[tokio::test(start_paused = true)]
async fn first_success_returns_immediately() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, &str> = call_with_retry(
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        },
        &quick_config(3),
        None::<fn(usize, &&str)>,
    )
    .await;

    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_until_success() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, &str> = call_with_retry(
        || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 { Err("transient") } else { Ok(3) }
        },
        &quick_config(5),
        None::<fn(usize, &&str)>,
    )
    .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn last_error_surfaces_after_exhaustion() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, String> = call_with_retry(
        || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure {attempt}"))
        },
        &quick_config(4),
        None::<fn(usize, &String)>,
    )
    .await;

    assert_eq!(result, Err("failure 4".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn on_error_sees_each_failed_attempt() {
    let mut observed = Vec::new();
    let calls = AtomicUsize::new(0);
    let result: Result<u64, &str> = call_with_retry(
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        },
        &quick_config(3),
        Some(|attempt: usize, err: &&str| observed.push((attempt, err.to_string()))),
    )
    .await;

    assert_eq!(result, Err("nope"));
    // The final attempt has no retry after it, so no handler call.
    assert_eq!(observed, vec![(1, "nope".to_string()), (2, "nope".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_and_caps() {
    let config = RetryConfig { max_retries: 10, min_delay_ms: 1_000, max_delay_ms: 4_000, backoff_factor: 2.0 };
    assert_eq!(config.delay(1), Duration::from_millis(1_000));
    assert_eq!(config.delay(2), Duration::from_millis(2_000));
    assert_eq!(config.delay(3), Duration::from_millis(4_000));
    assert_eq!(config.delay(4), Duration::from_millis(4_000));

    // Wall-clock check: two failures -> 1s + 2s of sleeping.
    let start = Instant::now();
    let calls = AtomicUsize::new(0);
    let _: Result<(), &str> = call_with_retry(
        || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 { Err("transient") } else { Ok(()) }
        },
        &config,
        None::<fn(usize, &&str)>,
    )
    .await;
    assert_eq!(Instant::now() - start, Duration::from_millis(3_000));
}
