use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;
use validator::Validate;

const DEFAULT_MAX_CONCURRENCY: usize = usize::MAX;

/// Configuration of a [`ThrottledQueue`]: at most
/// `max_invocations_per_interval` task starts in any sliding window of
/// `invocation_interval_ms`, and at most `max_concurrency` tasks in flight.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct ThrottledQueueConfig {
    #[validate(range(min = 1))]
    pub max_invocations_per_interval: usize,
    #[validate(range(min = 1))]
    pub invocation_interval_ms: u64,
    #[validate(range(min = 1))]
    pub max_concurrency: usize,
}

impl ThrottledQueueConfig {
    pub fn new(max_invocations_per_interval: usize, invocation_interval_ms: u64) -> Self {
        Self {
            max_invocations_per_interval,
            invocation_interval_ms,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

#[derive(Debug, Error)]
pub enum ThrottledQueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
    #[error("Queue dropped before the task completed")]
    Canceled,
}

type QueuedTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A FIFO task queue with a bounded start rate and a bounded in-flight count.
///
/// Tasks are deferred producers of asynchronous results. [`ThrottledQueue::add`]
/// appends a task and returns a handle resolving with the task's output once
/// it has been scheduled and run; scheduling happens on a spawned tick, never
/// inline with `add`. Cloning the queue shares the underlying state.
#[derive(Clone)]
pub struct ThrottledQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    max_starts: usize,
    interval: Duration,
    max_concurrency: usize,
    state: Mutex<QueueState>,
}

struct QueueState {
    tasks: VecDeque<QueuedTask>,
    // Start timestamps of the last `max_starts` task launches, oldest first.
    started_at: VecDeque<Instant>,
    in_flight: usize,
    pending_wake: Option<JoinHandle<()>>,
}

impl ThrottledQueue {
    pub fn new(config: ThrottledQueueConfig) -> Result<Self, ThrottledQueueError> {
        config.validate().map_err(|err| ThrottledQueueError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                max_starts: config.max_invocations_per_interval,
                interval: Duration::from_millis(config.invocation_interval_ms),
                max_concurrency: config.max_concurrency,
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    started_at: VecDeque::new(),
                    in_flight: 0,
                    pending_wake: None,
                }),
            }),
        })
    }

    /// Enqueues `start` and returns a handle to its eventual output. The
    /// output type may itself be a `Result` carrying the task's own error;
    /// the handle fails only if the queue is dropped before the task runs.
    pub fn add<T, Fut, F>(&self, start: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: QueuedTask = Box::new(move || {
            Box::pin(async move {
                let value = start().await;
                // The receiver may have been dropped; the task still ran.
                let _ = tx.send(value);
            })
        });
        self.inner.lock_state().tasks.push_back(task);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.tick() });

        TaskHandle { rx }
    }

    /// Number of queued, not-yet-started tasks. Running tasks are excluded.
    pub fn size(&self) -> usize {
        self.inner.lock_state().tasks.len()
    }
}

impl QueueInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("Queue state lock poisoned.")
    }

    /// One scheduling pass: prune the start-timestamp ring, launch as many
    /// tasks as both bounds allow, and arm a wake for the next throttle slot.
    fn tick(self: &Arc<Self>) {
        let mut state = self.lock_state();
        let now = Instant::now();

        while state
            .started_at
            .front()
            .is_some_and(|started| now.duration_since(*started) >= self.interval)
        {
            state.started_at.pop_front();
        }

        let throttle_remaining = self.max_starts.saturating_sub(state.started_at.len());
        let concurrency_remaining = self.max_concurrency.saturating_sub(state.in_flight);
        let batch = throttle_remaining.min(concurrency_remaining).min(state.tasks.len());
        trace!(
            queued = state.tasks.len(),
            in_flight = state.in_flight,
            batch,
            "Throttled queue scheduling pass"
        );

        for _ in 0..batch {
            let task = state.tasks.pop_front().expect("Batch is bounded by the queue length.");
            state.started_at.push_back(now);
            state.in_flight += 1;
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                task().await;
                queue.lock_state().in_flight -= 1;
                queue.tick();
            });
        }

        if !state.tasks.is_empty() {
            // When the throttle is the binding constraint the next slot opens
            // as the oldest ring entry expires; completions cover the
            // concurrency-bound case by re-ticking.
            if let Some(oldest) = state.started_at.front().copied() {
                let wake_at = oldest + self.interval;
                if let Some(stale) = state.pending_wake.take() {
                    stale.abort();
                }
                // Weak: the armed wake must not keep a dropped queue alive.
                let queue = Arc::downgrade(self);
                state.pending_wake = Some(tokio::spawn(async move {
                    sleep_until(wake_at).await;
                    if let Some(queue) = queue.upgrade() {
                        queue.tick();
                    }
                }));
            }
        }
    }
}

/// Caller-visible future for a queued task's output.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ThrottledQueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map_err(|_| ThrottledQueueError::Canceled)
    }
}
