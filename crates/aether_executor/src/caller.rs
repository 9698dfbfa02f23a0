use std::future::Future;

use aether_connection::RpcError;
use aether_infra_utils::retry::{call_with_retry, RetryConfig};
use aether_queue::{ThrottledQueue, ThrottledQueueConfig, ThrottledQueueError};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use validator::Validate;

const DEFAULT_CALLS_PER_INTERVAL: usize = 10;
const DEFAULT_CALL_INTERVAL_MS: u64 = 100;
const DEFAULT_CALL_CONCURRENCY: usize = 20;

const TOTAL_CALLS_METRIC: &str = "aether_caller_total_calls";
const CALLS_IN_QUEUE_METRIC: &str = "aether_caller_calls_in_queue";

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct ContractCallerConfig {
    #[validate(nested)]
    pub queue: ThrottledQueueConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
}

impl Default for ContractCallerConfig {
    fn default() -> Self {
        Self {
            queue: ThrottledQueueConfig::new(DEFAULT_CALLS_PER_INTERVAL, DEFAULT_CALL_INTERVAL_MS)
                .with_max_concurrency(DEFAULT_CALL_CONCURRENCY),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Queue(#[from] ThrottledQueueError),
}

/// Dispatcher for idempotent contract reads.
///
/// Every attempt of every call goes through the throttled queue, so the
/// endpoint sees a bounded request rate even while the retry envelope is
/// working through transient failures.
pub struct ContractCaller {
    queue: ThrottledQueue,
    retry: RetryConfig,
}

impl ContractCaller {
    pub fn new(config: ContractCallerConfig) -> Result<Self, ThrottledQueueError> {
        Ok(Self { queue: ThrottledQueue::new(config.queue)?, retry: config.retry })
    }

    /// Runs `call` (a factory producing a fresh read future per attempt)
    /// until it succeeds or the retry budget is exhausted. Each attempt is a
    /// separate enqueue, so retries respect the throttle.
    pub async fn make_call<T, Fut, F>(&self, call: F) -> Result<T, CallError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, RpcError>> + Send + 'static,
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
    {
        call_with_retry(
            || {
                let call = call.clone();
                let queue = self.queue.clone();
                let queue_in_task = self.queue.clone();
                async move {
                    let handle = queue.add(move || async move {
                        counter!(TOTAL_CALLS_METRIC).increment(1);
                        gauge!(CALLS_IN_QUEUE_METRIC).set(queue_in_task.size() as f64);
                        let result = call().await;
                        gauge!(CALLS_IN_QUEUE_METRIC).set(queue_in_task.size() as f64);
                        result
                    });
                    match handle.await {
                        Ok(result) => result.map_err(CallError::Rpc),
                        Err(err) => Err(CallError::Queue(err)),
                    }
                }
            },
            &self.retry,
            Some(|attempt: usize, err: &CallError| {
                debug!("Contract read attempt {attempt} failed: {err}");
            }),
        )
        .await
    }

    /// Reads currently queued but not started.
    pub fn calls_in_queue(&self) -> usize {
        self.queue.size()
    }
}
