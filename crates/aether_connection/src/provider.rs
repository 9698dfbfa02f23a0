use std::sync::Arc;
use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use futures::StreamExt;
#[cfg(any(feature = "testing", test))]
use mockall::automock;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::MissedTickBehavior;
use tracing::debug;
use url::Url;

use crate::contract::{AlloyContract, ContractHandle};
use crate::error::RpcError;
use crate::types::{TransactionResponse, TxReceipt};

/// The endpoint-facing surface the rest of the workspace sees. The alloy
/// provider is confined behind this trait so components and tests stay
/// library-agnostic.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait RpcProvider: Send + Sync {
    fn url(&self) -> Url;

    /// Materializes a contract handle bound to this provider (and therefore
    /// to its signer, when one is configured).
    fn contract(&self, address: Address, abi: JsonAbi) -> Arc<dyn ContractHandle>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError>;

    async fn balance(&self, address: Address) -> Result<U256, RpcError>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, RpcError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionResponse, RpcError>;

    /// A stream of new block numbers: a `newHeads` subscription on websocket
    /// endpoints, a change-deduplicated `eth_blockNumber` poll elsewhere.
    /// The backing task exits once the receiver is dropped.
    async fn block_stream(&self) -> Result<UnboundedReceiver<u64>, RpcError>;
}

pub struct AlloyRpcProvider {
    provider: DynProvider,
    url: Url,
    is_websocket: bool,
    block_poll_interval: Duration,
}

impl AlloyRpcProvider {
    pub async fn connect(
        url: Url,
        wallet: Option<EthereumWallet>,
        block_poll_interval: Duration,
    ) -> Result<Self, RpcError> {
        let is_websocket = matches!(url.scheme(), "ws" | "wss");
        let provider: DynProvider = if is_websocket {
            let ws = WsConnect::new(url.as_str());
            match wallet {
                Some(wallet) => ProviderBuilder::new()
                    .wallet(wallet)
                    .connect_ws(ws)
                    .await
                    .map_err(from_transport_error)?
                    .erased(),
                None => ProviderBuilder::new()
                    .connect_ws(ws)
                    .await
                    .map_err(from_transport_error)?
                    .erased(),
            }
        } else {
            match wallet {
                Some(wallet) => {
                    ProviderBuilder::new().wallet(wallet).connect_http(url.clone()).erased()
                }
                None => ProviderBuilder::new().connect_http(url.clone()).erased(),
            }
        };
        Ok(Self { provider, url, is_websocket, block_poll_interval })
    }
}

#[async_trait]
impl RpcProvider for AlloyRpcProvider {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn contract(&self, address: Address, abi: JsonAbi) -> Arc<dyn ContractHandle> {
        Arc::new(AlloyContract::new(address, abi, self.provider.clone()))
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.provider.get_block_number().await.map_err(from_transport_error)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        self.provider.get_transaction_count(address).await.map_err(from_transport_error)
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.provider.get_balance(address).await.map_err(from_transport_error)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, RpcError> {
        let receipt =
            self.provider.get_transaction_receipt(hash).await.map_err(from_transport_error)?;
        Ok(receipt.map(|receipt| TxReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            status: receipt.status(),
            gas_used: receipt.gas_used,
        }))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.provider.get_logs(filter).await.map_err(from_transport_error)
    }

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionResponse, RpcError> {
        let to = request.to.and_then(|kind| kind.to().copied());
        let from = request.from;
        let nonce = request.nonce;
        let pending =
            self.provider.send_transaction(request).await.map_err(from_transport_error)?;
        Ok(TransactionResponse { hash: *pending.tx_hash(), to, from, nonce })
    }

    async fn block_stream(&self) -> Result<UnboundedReceiver<u64>, RpcError> {
        let (tx, rx) = unbounded_channel();
        if self.is_websocket {
            let subscription =
                self.provider.subscribe_blocks().await.map_err(from_transport_error)?;
            tokio::spawn(async move {
                let mut headers = subscription.into_stream();
                while let Some(header) = headers.next().await {
                    if tx.send(header.number).is_err() {
                        return;
                    }
                }
            });
        } else {
            let provider = self.provider.clone();
            let poll_interval = self.block_poll_interval;
            tokio::spawn(async move {
                let mut last_seen: Option<u64> = None;
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if tx.is_closed() {
                        return;
                    }
                    match provider.get_block_number().await {
                        Ok(number) if last_seen != Some(number) => {
                            last_seen = Some(number);
                            if tx.send(number).is_err() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(err) => debug!("Block number poll failed: {err}"),
                    }
                }
            });
        }
        Ok(rx)
    }
}

/// Maps an alloy transport error into [`RpcError`], preserving any error
/// payload bytes the node attached.
pub(crate) fn from_transport_error(err: alloy::transports::TransportError) -> RpcError {
    let body = err
        .as_error_resp()
        .and_then(|payload| payload.data.as_ref())
        .map(|raw| raw.get().as_bytes().to_vec());
    RpcError { message: err.to_string(), body }
}
