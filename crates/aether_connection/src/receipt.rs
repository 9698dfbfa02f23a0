use std::sync::Arc;
use std::time::Duration;

use aether_infra_utils::retry::{call_with_retry, RetryConfig, DEFAULT_MAX_RETRIES};
use alloy::primitives::TxHash;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ConnectionError, RpcError};
use crate::provider::RpcProvider;
use crate::types::TxReceipt;

const RECEIPT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_MIN_DELAY_MS: u64 = 2_000;
const RECEIPT_MAX_DELAY_MS: u64 = 60_000;
const RECEIPT_BACKOFF_FACTOR: f64 = 1.5;

fn receipt_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: DEFAULT_MAX_RETRIES,
        min_delay_ms: RECEIPT_MIN_DELAY_MS,
        max_delay_ms: RECEIPT_MAX_DELAY_MS,
        backoff_factor: RECEIPT_BACKOFF_FACTOR,
    }
}

/// Polls for the receipt of `hash` until it is mined or the retry budget is
/// exhausted. Each poll runs under its own timeout; an unmined transaction
/// counts as a failed attempt.
pub async fn wait_for_transaction(
    provider: Arc<dyn RpcProvider>,
    hash: TxHash,
) -> Result<TxReceipt, ConnectionError> {
    let provider = &provider;
    call_with_retry(
        || async move {
            match timeout(RECEIPT_ATTEMPT_TIMEOUT, provider.transaction_receipt(hash)).await {
                Err(_) => Err(RpcError::new(format!("Receipt query for {hash} timed out"))),
                Ok(Err(err)) => Err(err),
                Ok(Ok(None)) => Err(RpcError::new(format!("Transaction {hash} is not yet mined"))),
                Ok(Ok(Some(receipt))) => Ok(receipt),
            }
        },
        &receipt_retry_config(),
        Some(|attempt: usize, err: &RpcError| {
            debug!("Receipt poll attempt {attempt} for {hash}: {err}");
        }),
    )
    .await
    .map_err(|_| ConnectionError::ReceiptUnavailable(hash))
}
