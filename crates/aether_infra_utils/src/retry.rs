use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;
use validator::Validate;

pub const DEFAULT_MAX_RETRIES: usize = 12;
const DEFAULT_MIN_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct RetryConfig {
    #[validate(range(min = 1))]
    pub max_retries: usize,
    #[validate(range(min = 1))]
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    #[validate(range(min = 1.0))]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryConfig {
    /// The delay preceding attempt `attempt + 1`, growing exponentially from
    /// `min_delay_ms` and capped at `max_delay_ms`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = (self.min_delay_ms as f64) * self.backoff_factor.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }
}

/// Invokes `f` until it succeeds or `max_retries` attempts are exhausted,
/// sleeping an exponentially growing delay between attempts. `on_error` is
/// invoked with the attempt number and the error between attempts.
pub async fn call_with_retry<T, E, Fut, F, H>(
    mut f: F,
    config: &RetryConfig,
    mut on_error: Option<H>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    H: FnMut(usize, &E),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_retries {
                    return Err(err);
                }
                debug!("Attempt {attempt}/{} failed: {err}", config.max_retries);
                if let Some(handler) = on_error.as_mut() {
                    handler(attempt, &err);
                }
                sleep(config.delay(attempt)).await;
            }
        }
    }
}
