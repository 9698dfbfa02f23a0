use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use aether_gas_oracle::{GasOracleClient, GasOracleConfig, GasPrices};
use aether_infra_utils::event_channel::{EventChannel, EventSubscription};
use aether_infra_utils::retry::{call_with_retry, RetryConfig};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Signature, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use futures::future::BoxFuture;
#[cfg(any(feature = "testing", test))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;
use validator::Validate;

use crate::contract::{ContractHandle, ContractLoader};
use crate::error::{ConnectionError, RpcError};
use crate::provider::{AlloyRpcProvider, RpcProvider};
use crate::receipt;
use crate::types::{TransactionResponse, TxReceipt};

const DEFAULT_BLOCK_POLL_INTERVAL_MS: u64 = 8_000;
const DEFAULT_GAS_PRICES_INTERVAL_MS: u64 = 60_000;
const DEFAULT_BALANCE_INTERVAL_MS: u64 = 10_000;
const DEFAULT_BLOCK_DEBOUNCE_MS: u64 = 1_000;

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConnectionConfig {
    pub rpc_url: Url,
    #[validate(range(min = 1))]
    pub block_poll_interval_ms: u64,
    #[validate(range(min = 1))]
    pub gas_prices_interval_ms: u64,
    #[validate(range(min = 1))]
    pub balance_interval_ms: u64,
    #[validate(range(min = 1))]
    pub block_debounce_ms: u64,
    #[validate(nested)]
    pub retry: RetryConfig,
    #[validate(nested)]
    pub gas_oracle: GasOracleConfig,
}

impl ConnectionConfig {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            block_poll_interval_ms: DEFAULT_BLOCK_POLL_INTERVAL_MS,
            gas_prices_interval_ms: DEFAULT_GAS_PRICES_INTERVAL_MS,
            balance_interval_ms: DEFAULT_BALANCE_INTERVAL_MS,
            block_debounce_ms: DEFAULT_BLOCK_DEBOUNCE_MS,
            retry: RetryConfig::default(),
            gas_oracle: GasOracleConfig::default(),
        }
    }
}

/// Builds a provider for a URL, optionally carrying a signing wallet.
/// Injectable so tests can substitute mock providers.
pub type ProviderFactory = Arc<
    dyn Fn(Url, Option<EthereumWallet>) -> BoxFuture<'static, Result<Arc<dyn RpcProvider>, RpcError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
struct SignerState {
    private_key: String,
    signer: PrivateKeySigner,
}

#[derive(Default)]
struct ContractRegistry {
    contracts: HashMap<Address, Arc<dyn ContractHandle>>,
    loaders: HashMap<Address, ContractLoader>,
}

/// The surface the transaction executor needs from the connection. Split off
/// so executor logic can run against a mock.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait ConnectionApi: Send + Sync {
    fn rpc_url(&self) -> Url;

    fn user_address(&self) -> Option<Address>;

    /// Most recently polled oracle prices.
    fn current_gas_prices(&self) -> GasPrices;

    /// The chain's view of the signer's nonce; 0 when no signer is set.
    async fn chain_nonce(&self) -> Result<u64, ConnectionError>;

    async fn wait_for_transaction(&self, hash: TxHash) -> Result<TxReceipt, ConnectionError>;
}

/// Owns the RPC endpoint and everything attached to it: the optional signing
/// key, the contract registry, the block-number watcher, and the periodic
/// gas-price and balance polls.
pub struct EthereumConnection {
    pub(crate) config: ConnectionConfig,
    oracle: GasOracleClient,
    provider_factory: ProviderFactory,
    provider: RwLock<Arc<dyn RpcProvider>>,
    rpc_url: RwLock<Url>,
    signer: RwLock<Option<SignerState>>,
    registry: tokio::sync::Mutex<ContractRegistry>,
    pub(crate) block_number: AtomicU64,
    balance: Mutex<U256>,
    gas_prices: Mutex<GasPrices>,
    pub(crate) block_number_events: EventChannel<u64>,
    gas_price_events: EventChannel<GasPrices>,
    balance_events: EventChannel<U256>,
    rpc_url_events: EventChannel<Url>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for EthereumConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumConnection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EthereumConnection {
    pub async fn connect(config: ConnectionConfig) -> Result<Arc<Self>, ConnectionError> {
        let block_poll_interval = Duration::from_millis(config.block_poll_interval_ms);
        let factory: ProviderFactory = Arc::new(move |url, wallet| {
            Box::pin(async move {
                let provider = AlloyRpcProvider::connect(url, wallet, block_poll_interval).await?;
                Ok(Arc::new(provider) as Arc<dyn RpcProvider>)
            })
        });
        Self::connect_with_factory(config, factory).await
    }

    pub async fn connect_with_factory(
        config: ConnectionConfig,
        provider_factory: ProviderFactory,
    ) -> Result<Arc<Self>, ConnectionError> {
        config.validate().map_err(|err| ConnectionError::InvalidConfig(err.to_string()))?;
        let provider = provider_factory(config.rpc_url.clone(), None).await?;
        let block_number = provider.block_number().await?;
        info!("Connected to {} at block {block_number}.", config.rpc_url);

        let oracle = GasOracleClient::new(config.gas_oracle.clone());
        let connection = Arc::new(Self {
            rpc_url: RwLock::new(config.rpc_url.clone()),
            config,
            oracle,
            provider_factory,
            provider: RwLock::new(provider),
            signer: RwLock::new(None),
            registry: tokio::sync::Mutex::new(ContractRegistry::default()),
            block_number: AtomicU64::new(block_number),
            balance: Mutex::new(U256::ZERO),
            gas_prices: Mutex::new(GasPrices::default()),
            block_number_events: EventChannel::with_replay(),
            gas_price_events: EventChannel::with_replay(),
            balance_events: EventChannel::with_replay(),
            rpc_url_events: EventChannel::with_replay(),
            tasks: Mutex::new(Vec::new()),
        });
        connection.block_number_events.publish(block_number);
        connection.spawn_polls();
        Ok(connection)
    }

    fn spawn_polls(self: &Arc<Self>) {
        let gas_interval = Duration::from_millis(self.config.gas_prices_interval_ms);
        let connection = Arc::downgrade(self);
        let gas_task = tokio::spawn(async move {
            let mut ticker = interval(gas_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(connection) = connection.upgrade() else { return };
                connection.refresh_gas_prices().await;
            }
        });

        let balance_interval = Duration::from_millis(self.config.balance_interval_ms);
        let connection = Arc::downgrade(self);
        let balance_task = tokio::spawn(async move {
            let mut ticker = interval(balance_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(connection) = connection.upgrade() else { return };
                connection.refresh_balance().await;
            }
        });

        let mut tasks = self.lock_tasks();
        tasks.push(gas_task);
        tasks.push(balance_task);
    }

    /// Cancels the polling and watcher tasks. In-flight RPC work is left to
    /// complete on its own.
    pub fn destroy(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }

    pub(crate) fn provider(&self) -> Arc<dyn RpcProvider> {
        self.provider.read().expect("Provider lock poisoned.").clone()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().expect("Task list lock poisoned.")
    }

    // --- Accounts and signing ---

    pub fn address(&self) -> Option<Address> {
        self.signer
            .read()
            .expect("Signer lock poisoned.")
            .as_ref()
            .map(|state| state.signer.address())
    }

    pub fn private_key(&self) -> Option<String> {
        self.signer
            .read()
            .expect("Signer lock poisoned.")
            .as_ref()
            .map(|state| state.private_key.clone())
    }

    fn wallet(&self) -> Option<EthereumWallet> {
        self.signer
            .read()
            .expect("Signer lock poisoned.")
            .as_ref()
            .map(|state| EthereumWallet::from(state.signer.clone()))
    }

    /// Installs the signing key: rebuilds the provider with the wallet
    /// attached, refreshes the balance, and reloads every registered contract
    /// so the handles carry the signer. A previous signer is dropped.
    pub async fn set_account(&self, private_key: &str) -> Result<Address, ConnectionError> {
        let signer: PrivateKeySigner =
            private_key.parse().map_err(|err: alloy::signers::local::LocalSignerError| {
                ConnectionError::InvalidKey(err.to_string())
            })?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer.clone());
        let provider =
            (self.provider_factory)(self.current_rpc_url(), Some(wallet)).await?;

        *self.signer.write().expect("Signer lock poisoned.") =
            Some(SignerState { private_key: private_key.to_string(), signer });
        *self.provider.write().expect("Provider lock poisoned.") = provider;

        self.refresh_balance().await;
        self.reload_contracts().await?;
        info!("Account {address} installed.");
        Ok(address)
    }

    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, ConnectionError> {
        let signer = self
            .signer
            .read()
            .expect("Signer lock poisoned.")
            .as_ref()
            .map(|state| state.signer.clone())
            .ok_or(ConnectionError::NoSigner)?;
        signer
            .sign_message(message)
            .await
            .map_err(|err| ConnectionError::Signing(err.to_string()))
    }

    pub async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionResponse, ConnectionError> {
        if self.signer.read().expect("Signer lock poisoned.").is_none() {
            return Err(ConnectionError::NoSigner);
        }
        Ok(self.provider().send_transaction(request).await?)
    }

    // --- Endpoint management ---

    pub fn current_rpc_url(&self) -> Url {
        self.rpc_url.read().expect("RPC URL lock poisoned.").clone()
    }

    /// Moves the connection to a new endpoint. Contracts are reloaded against
    /// the new provider *before* the swap becomes visible, so a handle fetched
    /// from the registry is never bound to a stale endpoint; work already in
    /// flight completes against the old provider.
    pub async fn set_rpc_url(&self, url: Url) -> Result<(), ConnectionError> {
        let provider = (self.provider_factory)(url.clone(), self.wallet()).await?;
        self.reload_contracts_against(provider.clone()).await?;
        self.rpc_url_events.publish(url.clone());
        *self.rpc_url.write().expect("RPC URL lock poisoned.") = url;
        *self.provider.write().expect("Provider lock poisoned.") = provider;
        Ok(())
    }

    // --- Contract registry ---

    /// Registers `loader` for `address`, invokes it against the current
    /// provider, and returns the resulting handle.
    pub async fn load_contract(
        &self,
        address: Address,
        loader: ContractLoader,
    ) -> Result<Arc<dyn ContractHandle>, ConnectionError> {
        let handle = loader(address, self.provider()).await?;
        let mut registry = self.registry.lock().await;
        registry.loaders.insert(address, loader);
        registry.contracts.insert(address, handle.clone());
        Ok(handle)
    }

    pub async fn get_contract(
        &self,
        address: Address,
    ) -> Result<Arc<dyn ContractHandle>, ConnectionError> {
        self.registry
            .lock()
            .await
            .contracts
            .get(&address)
            .cloned()
            .ok_or(ConnectionError::ContractNotLoaded(address))
    }

    /// Re-invokes every registered loader and replaces every handle.
    pub async fn reload_contracts(&self) -> Result<(), ConnectionError> {
        self.reload_contracts_against(self.provider()).await
    }

    async fn reload_contracts_against(
        &self,
        provider: Arc<dyn RpcProvider>,
    ) -> Result<(), ConnectionError> {
        let mut registry = self.registry.lock().await;
        let loaders: Vec<(Address, ContractLoader)> =
            registry.loaders.iter().map(|(address, loader)| (*address, loader.clone())).collect();
        for (address, loader) in loaders {
            let handle = loader(address, provider.clone()).await?;
            registry.contracts.insert(address, handle);
            debug!("Reloaded contract at {address}.");
        }
        Ok(())
    }

    // --- Chain reads ---

    pub fn block_number(&self) -> u64 {
        self.block_number.load(Ordering::SeqCst)
    }

    pub fn gas_prices(&self) -> GasPrices {
        *self.gas_prices.lock().expect("Gas price lock poisoned.")
    }

    pub fn balance(&self) -> U256 {
        *self.balance.lock().expect("Balance lock poisoned.")
    }

    pub async fn nonce(&self) -> Result<u64, ConnectionError> {
        let Some(address) = self.address() else {
            return Ok(0);
        };
        let provider = self.provider();
        call_with_retry(
            || {
                let provider = provider.clone();
                async move { provider.transaction_count(address).await }
            },
            &self.config.retry,
            Some(on_rpc_retry("transaction count")),
        )
        .await
        .map_err(Into::into)
    }

    pub async fn load_balance(&self, address: Address) -> Result<U256, ConnectionError> {
        let provider = self.provider();
        call_with_retry(
            || {
                let provider = provider.clone();
                async move { provider.balance(address).await }
            },
            &self.config.retry,
            Some(on_rpc_retry("balance")),
        )
        .await
        .map_err(Into::into)
    }

    // --- Periodic refreshes ---

    pub async fn refresh_gas_prices(&self) {
        let prices = self.oracle.get_auto_gas_prices().await;
        *self.gas_prices.lock().expect("Gas price lock poisoned.") = prices;
        self.gas_price_events.publish(prices);
    }

    async fn refresh_balance(&self) {
        let Some(address) = self.address() else {
            return;
        };
        match self.load_balance(address).await {
            Ok(balance) => {
                *self.balance.lock().expect("Balance lock poisoned.") = balance;
                self.balance_events.publish(balance);
            }
            Err(err) => warn!("Balance refresh for {address} failed: {err}"),
        }
    }

    // --- Event streams ---

    pub fn subscribe_block_number(&self) -> EventSubscription<u64> {
        self.block_number_events.subscribe()
    }

    pub fn subscribe_gas_prices(&self) -> EventSubscription<GasPrices> {
        self.gas_price_events.subscribe()
    }

    pub fn subscribe_balance(&self) -> EventSubscription<U256> {
        self.balance_events.subscribe()
    }

    pub fn subscribe_rpc_url(&self) -> EventSubscription<Url> {
        self.rpc_url_events.subscribe()
    }
}

#[async_trait]
impl ConnectionApi for EthereumConnection {
    fn rpc_url(&self) -> Url {
        self.current_rpc_url()
    }

    fn user_address(&self) -> Option<Address> {
        self.address()
    }

    fn current_gas_prices(&self) -> GasPrices {
        self.gas_prices()
    }

    async fn chain_nonce(&self) -> Result<u64, ConnectionError> {
        self.nonce().await
    }

    async fn wait_for_transaction(&self, hash: TxHash) -> Result<TxReceipt, ConnectionError> {
        receipt::wait_for_transaction(self.provider(), hash).await
    }
}

fn on_rpc_retry(operation: &'static str) -> impl FnMut(usize, &RpcError) {
    move |attempt, err| debug!("Retrying {operation} query after attempt {attempt}: {err}")
}
