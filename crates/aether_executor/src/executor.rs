use std::sync::Arc;
use std::time::Duration;

use aether_connection::{
    auto_gas_price_gwei,
    ConnectionApi,
    ContractHandle,
    GasSetting,
    RpcError,
    TransactionOverrides,
    TransactionResponse,
    TxReceipt,
};
use aether_infra_utils::units::gwei_to_wei;
use aether_queue::{ThrottledQueue, ThrottledQueueConfig, ThrottledQueueError};
use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, TxHash};
use futures::future::BoxFuture;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use validator::Validate;

const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_NONCE_STALE_AFTER_MS: u64 = 300_000;
const DEFAULT_GAS_LIMIT: u64 = 2_000_000;

// The internal queue admits a small burst but keeps submissions strictly
// serial, which is what makes the nonce bookkeeping race-free.
const SUBMISSIONS_PER_INTERVAL: usize = 3;
const SUBMISSION_INTERVAL_MS: u64 = 100;

const SUBMITTED_METRIC: &str = "aether_executor_transactions_submitted";
const REVERTED_METRIC: &str = "aether_executor_transactions_reverted";

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct TransactionExecutorConfig {
    #[validate(range(min = 1))]
    pub submit_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub nonce_stale_after_ms: u64,
    #[validate(range(min = 1))]
    pub default_gas_limit: u64,
}

impl Default for TransactionExecutorConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT_MS,
            nonce_stale_after_ms: DEFAULT_NONCE_STALE_AFTER_MS,
            default_gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum SubmitError {
    #[error("Submission of action {action_id} timed out after {timeout_ms} ms")]
    Timeout { action_id: String, timeout_ms: u64 },
    #[error("Pre-transaction hook rejected action {action_id}: {message}")]
    PreHook { action_id: String, message: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Executor dropped before the transaction was submitted")]
    ExecutorDropped,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReceiptError {
    #[error("Confirmation abandoned: the submission did not succeed")]
    ConfirmationAbandoned,
    #[error("Receipt wait failed: {message}")]
    Wait { message: String },
}

/// A state-changing call waiting in (or moving through) the executor.
pub struct QueuedTransaction {
    pub action_id: String,
    pub contract: Arc<dyn ContractHandle>,
    pub method_name: String,
    pub args: Vec<DynSolValue>,
    pub overrides: TransactionOverrides,
}

/// Per-transaction completion callbacks. Each fires at most once; on failure
/// exactly one of the two error callbacks fires.
#[derive(Default)]
pub struct TransactionHooks {
    pub on_transaction_response: Option<Box<dyn FnOnce(&TransactionResponse) + Send>>,
    pub on_transaction_receipt: Option<Box<dyn FnOnce(&TxReceipt) + Send>>,
    pub on_submission_error: Option<Box<dyn FnOnce(&SubmitError) + Send>>,
    pub on_receipt_error: Option<Box<dyn FnOnce(&ReceiptError) + Send>>,
}

/// Runs before each submission; an error aborts the transaction.
pub type BeforeTransactionHook = Arc<
    dyn for<'a> Fn(&'a QueuedTransaction) -> BoxFuture<'a, Result<(), String>> + Send + Sync,
>;

/// Receives the telemetry event of each finished transaction.
pub type AfterTransactionHook =
    Arc<dyn Fn(TransactionLogEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Supplies the user's current auto-gas preference.
pub type GasSettingProvider = Arc<dyn Fn() -> GasSetting + Send + Sync>;

#[derive(Default)]
pub struct ExecutorHooks {
    pub gas_setting: Option<GasSettingProvider>,
    pub before_transaction: Option<BeforeTransactionHook>,
    pub after_transaction: Option<AfterTransactionHook>,
}

/// Telemetry for one transaction, from queueing to its terminal state.
/// Durations are in milliseconds.
#[derive(Clone, Debug, Serialize)]
pub struct TransactionLogEvent {
    pub tx_to: Option<Address>,
    pub tx_type: String,
    pub tx_hash: Option<TxHash>,
    pub time_exec_called: u64,
    pub wait_submit: u64,
    pub wait_confirm: Option<u64>,
    pub wait_error: Option<u64>,
    pub error: Option<String>,
    pub parsed_error: Option<String>,
    pub rpc_endpoint: String,
    pub user_address: Option<Address>,
}

/// Two independently awaitable phases of a queued transaction. `submitted`
/// resolves on mempool acceptance; `confirmed` once the transaction is mined.
/// A failed submission abandons `confirmed` with
/// [`ReceiptError::ConfirmationAbandoned`].
pub struct PendingTransaction {
    pub submitted: SubmittedTransaction,
    pub confirmed: ConfirmedTransaction,
}

pub struct SubmittedTransaction(oneshot::Receiver<Result<TransactionResponse, SubmitError>>);

impl std::future::Future for SubmittedTransaction {
    type Output = Result<TransactionResponse, SubmitError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SubmitError::ExecutorDropped)))
    }
}

pub struct ConfirmedTransaction(oneshot::Receiver<Result<TxReceipt, ReceiptError>>);

impl std::future::Future for ConfirmedTransaction {
    type Output = Result<TxReceipt, ReceiptError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ReceiptError::ConfirmationAbandoned)))
    }
}

struct NonceState {
    nonce: Option<u64>,
    last_transaction_at: Option<Instant>,
}

struct ExecutorInner {
    connection: Arc<dyn ConnectionApi>,
    config: TransactionExecutorConfig,
    state: tokio::sync::Mutex<NonceState>,
    gas_setting: GasSettingProvider,
    before_transaction: Option<BeforeTransactionHook>,
    after_transaction: Option<AfterTransactionHook>,
    default_overrides: TransactionOverrides,
}

/// Serialized submission of state-changing transactions.
///
/// Submissions run strictly one at a time in enqueue order, so while the
/// nonce is live each submission carries the previous nonce plus one. The
/// receipt wait runs as a detached task: the queue slot frees as soon as the
/// submission resolves, letting the next transaction go out while earlier
/// ones are still mining.
pub struct TransactionExecutor {
    inner: Arc<ExecutorInner>,
    queue: ThrottledQueue,
}

impl TransactionExecutor {
    pub fn new(
        connection: Arc<dyn ConnectionApi>,
        config: TransactionExecutorConfig,
        hooks: ExecutorHooks,
    ) -> Result<Self, ThrottledQueueError> {
        let queue = ThrottledQueue::new(
            ThrottledQueueConfig::new(SUBMISSIONS_PER_INTERVAL, SUBMISSION_INTERVAL_MS)
                .with_max_concurrency(1),
        )?;
        let default_gas_limit = config.default_gas_limit;
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                connection,
                config,
                state: tokio::sync::Mutex::new(NonceState {
                    nonce: None,
                    last_transaction_at: None,
                }),
                gas_setting: hooks.gas_setting.unwrap_or_else(|| Arc::new(|| GasSetting::Average)),
                before_transaction: hooks.before_transaction,
                after_transaction: hooks.after_transaction,
                default_overrides: TransactionOverrides {
                    gas_limit: Some(default_gas_limit),
                    ..TransactionOverrides::default()
                },
            }),
            queue,
        })
    }

    /// Queues a state-changing call and returns its two-phase completion
    /// immediately. The gas price is resolved here, at queueing time, from
    /// the connection's latest oracle prices unless the caller overrode it.
    pub fn queue_transaction(
        &self,
        action_id: impl Into<String>,
        contract: Arc<dyn ContractHandle>,
        method_name: impl Into<String>,
        args: Vec<DynSolValue>,
        mut overrides: TransactionOverrides,
        hooks: TransactionHooks,
    ) -> PendingTransaction {
        if overrides.gas_price.is_none() {
            let gwei = auto_gas_price_gwei(
                &self.inner.connection.current_gas_prices(),
                &(self.inner.gas_setting)(),
            );
            overrides.gas_price = Some(gwei_to_wei(gwei));
        }

        let request = QueuedTransaction {
            action_id: action_id.into(),
            contract,
            method_name: method_name.into(),
            args,
            overrides,
        };
        let (submitted_tx, submitted_rx) = oneshot::channel();
        let (confirmed_tx, confirmed_rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        let enqueued_at = Instant::now();
        // The task handle is dropped on purpose: completion is delivered
        // through the per-transaction channels and hooks.
        let _ = self.queue.add(move || {
            inner.execute(request, hooks, submitted_tx, confirmed_tx, enqueued_at)
        });

        PendingTransaction {
            submitted: SubmittedTransaction(submitted_rx),
            confirmed: ConfirmedTransaction(confirmed_rx),
        }
    }
}

impl ExecutorInner {
    async fn execute(
        self: Arc<Self>,
        request: QueuedTransaction,
        mut hooks: TransactionHooks,
        submitted_tx: oneshot::Sender<Result<TransactionResponse, SubmitError>>,
        confirmed_tx: oneshot::Sender<Result<TxReceipt, ReceiptError>>,
        enqueued_at: Instant,
    ) {
        let exec_started = Instant::now();
        let queue_wait = exec_started - enqueued_at;
        let mut state = self.state.lock().await;

        // Nonce refresh: unknown, or stale after a long quiet period during
        // which another wallet may have moved the account.
        let stale_after = Duration::from_millis(self.config.nonce_stale_after_ms);
        let needs_refresh = match (state.nonce, state.last_transaction_at) {
            (None, _) => true,
            (Some(_), Some(last)) => exec_started.duration_since(last) > stale_after,
            (Some(_), None) => false,
        };
        if needs_refresh {
            match self.connection.chain_nonce().await {
                Ok(nonce) => {
                    debug!("Refreshed nonce from chain: {nonce}.");
                    state.nonce = Some(nonce);
                }
                Err(err) => warn!("Nonce refresh failed, keeping local state: {err}"),
            }
        }

        if let Some(before) = &self.before_transaction {
            if let Err(message) = before(&request).await {
                let error = SubmitError::PreHook { action_id: request.action_id.clone(), message };
                self.finish_submission_failure(
                    &request,
                    error,
                    &mut hooks,
                    submitted_tx,
                    confirmed_tx,
                    queue_wait,
                    exec_started,
                )
                .await;
                return;
            }
        }

        // Compose the effective overrides: a fresh copy of the defaults,
        // overlaid field-by-field, with the live nonce attached.
        let mut overrides = self.default_overrides.clone();
        overlay_overrides(&mut overrides, &request.overrides);
        overrides.nonce = state.nonce;

        let submit_timeout = Duration::from_millis(self.config.submit_timeout_ms);
        let outcome = timeout(
            submit_timeout,
            request.contract.submit(&request.method_name, &request.args, &overrides),
        )
        .await;

        let response = match outcome {
            Err(_elapsed) => Err(SubmitError::Timeout {
                action_id: request.action_id.clone(),
                timeout_ms: self.config.submit_timeout_ms,
            }),
            Ok(Err(rpc)) => Err(SubmitError::Rpc(rpc)),
            Ok(Ok(response)) => Ok(response),
        };

        let response = match response {
            Err(error) => {
                self.finish_submission_failure(
                    &request,
                    error,
                    &mut hooks,
                    submitted_tx,
                    confirmed_tx,
                    queue_wait,
                    exec_started,
                )
                .await;
                return;
            }
            Ok(response) => response,
        };

        // Post-submission accounting. A submission that used a live nonce
        // consumes it; the next transaction gets the successor.
        if let Some(nonce) = state.nonce {
            state.nonce = Some(nonce + 1);
        }
        state.last_transaction_at = Some(Instant::now());
        drop(state);
        counter!(SUBMITTED_METRIC).increment(1);

        let wait_submit = exec_started.elapsed();
        if let Some(on_response) = hooks.on_transaction_response.take() {
            on_response(&response);
        }
        let _ = submitted_tx.send(Ok(response.clone()));

        // Detached confirmation: the queue slot frees when this function
        // returns, not when the receipt arrives.
        let executor = Arc::clone(&self);
        tokio::spawn(async move {
            executor
                .confirm(request, response, hooks, confirmed_tx, queue_wait, wait_submit)
                .await;
        });
    }

    async fn confirm(
        self: Arc<Self>,
        request: QueuedTransaction,
        response: TransactionResponse,
        mut hooks: TransactionHooks,
        confirmed_tx: oneshot::Sender<Result<TxReceipt, ReceiptError>>,
        queue_wait: Duration,
        wait_submit: Duration,
    ) {
        let wait_started = Instant::now();
        let mut event = self.base_event(&request, queue_wait);
        event.tx_hash = Some(response.hash);
        event.wait_submit = as_millis(wait_submit);

        match self.connection.wait_for_transaction(response.hash).await {
            Ok(receipt) => {
                event.wait_confirm = Some(as_millis(wait_started.elapsed()));
                if !receipt.status {
                    counter!(REVERTED_METRIC).increment(1);
                    event.error = Some("transaction reverted".to_string());
                    warn!("Transaction {} of action {} reverted.", response.hash, request.action_id);
                }
                if let Some(on_receipt) = hooks.on_transaction_receipt.take() {
                    on_receipt(&receipt);
                }
                let _ = confirmed_tx.send(Ok(receipt));
            }
            Err(err) => {
                event.wait_error = Some(as_millis(wait_started.elapsed()));
                event.error = Some(err.to_string());
                let error = ReceiptError::Wait { message: err.to_string() };
                if let Some(on_receipt_error) = hooks.on_receipt_error.take() {
                    on_receipt_error(&error);
                }
                let _ = confirmed_tx.send(Err(error));
            }
        }

        self.deliver_event(event).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_submission_failure(
        &self,
        request: &QueuedTransaction,
        error: SubmitError,
        hooks: &mut TransactionHooks,
        submitted_tx: oneshot::Sender<Result<TransactionResponse, SubmitError>>,
        confirmed_tx: oneshot::Sender<Result<TxReceipt, ReceiptError>>,
        queue_wait: Duration,
        exec_started: Instant,
    ) {
        warn!("Submission for action {} failed: {error}", request.action_id);
        let mut event = self.base_event(request, queue_wait);
        event.wait_submit = as_millis(exec_started.elapsed());
        event.error = Some(error.to_string());
        event.parsed_error = parse_error_body(&error);

        if let Some(on_submission_error) = hooks.on_submission_error.take() {
            on_submission_error(&error);
        }
        let _ = submitted_tx.send(Err(error));
        // Dropping the confirmation sender abandons the `confirmed` phase.
        drop(confirmed_tx);

        self.deliver_event(event).await;
    }

    fn base_event(&self, request: &QueuedTransaction, queue_wait: Duration) -> TransactionLogEvent {
        TransactionLogEvent {
            tx_to: Some(request.contract.address()),
            tx_type: request.method_name.clone(),
            tx_hash: None,
            time_exec_called: as_millis(queue_wait),
            wait_submit: 0,
            wait_confirm: None,
            wait_error: None,
            error: None,
            parsed_error: None,
            rpc_endpoint: self.connection.rpc_url().to_string(),
            user_address: self.connection.user_address(),
        }
    }

    async fn deliver_event(&self, event: TransactionLogEvent) {
        debug!("Transaction finished: {event:?}");
        if let Some(after) = &self.after_transaction {
            after(event).await;
        }
    }
}

fn overlay_overrides(base: &mut TransactionOverrides, caller: &TransactionOverrides) {
    if caller.gas_price.is_some() {
        base.gas_price = caller.gas_price;
    }
    if caller.gas_limit.is_some() {
        base.gas_limit = caller.gas_limit;
    }
    if caller.value.is_some() {
        base.value = caller.value;
    }
}

/// Best-effort decoding of the raw error payload bytes into readable text.
fn parse_error_body(error: &SubmitError) -> Option<String> {
    match error {
        SubmitError::Rpc(RpcError { body: Some(body), .. }) => {
            Some(String::from_utf8_lossy(body).into_owned())
        }
        _ => None,
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
