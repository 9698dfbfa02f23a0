use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::try_join_all;
use tracing::debug;

/// How many times an empty batch is re-fetched before being accepted as the
/// legitimate content of its range.
pub const DEFAULT_MAX_EMPTY_RETRIES: usize = 16;

/// Fetches `[0, total)` as `ceil(total / query_size)` half-open chunks, all in
/// flight concurrently, and flattens the results in chunk order.
///
/// A chunk yielding an empty batch is re-fetched without delay up to
/// `DEFAULT_MAX_EMPTY_RETRIES` times; after that the empty batch is accepted.
/// `on_progress` observes the fetched fraction after each finished chunk and
/// is guaranteed a final call with exactly `1.0`.
pub async fn aggregate_bulk_getter<T, E, F, Fut, P>(
    total: u64,
    query_size: u64,
    getter: F,
    on_progress: Option<P>,
) -> Result<Vec<T>, E>
where
    F: Fn(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
    P: Fn(f64),
{
    aggregate_bulk_getter_with_cap(total, query_size, DEFAULT_MAX_EMPTY_RETRIES, getter, on_progress)
        .await
}

pub async fn aggregate_bulk_getter_with_cap<T, E, F, Fut, P>(
    total: u64,
    query_size: u64,
    max_empty_retries: usize,
    getter: F,
    on_progress: Option<P>,
) -> Result<Vec<T>, E>
where
    F: Fn(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
    P: Fn(f64),
{
    let fetched = AtomicU64::new(0);
    let getter = &getter;
    let on_progress = &on_progress;
    let fetched = &fetched;

    let chunks = (0..total.div_ceil(query_size.max(1))).map(|index| {
        let start = index * query_size;
        let end = (start + query_size).min(total);
        async move {
            let mut batch = getter(start, end).await?;
            let mut empty_retries = 0;
            while batch.is_empty() && empty_retries < max_empty_retries {
                empty_retries += 1;
                batch = getter(start, end).await?;
            }
            if batch.is_empty() && empty_retries == max_empty_retries {
                debug!("Accepting empty batch for range [{start}, {end}) after {empty_retries} refetches.");
            }
            let done = fetched.fetch_add(end - start, Ordering::SeqCst) + (end - start);
            if let Some(report) = on_progress {
                report(done as f64 / total as f64);
            }
            Ok(batch)
        }
    });

    let batches = try_join_all(chunks).await?;
    if let Some(report) = on_progress {
        report(1.0);
    }
    Ok(batches.into_iter().flatten().collect())
}
