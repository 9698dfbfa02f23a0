use std::sync::Arc;

use alloy::contract::{ContractInstance, Interface};
use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use alloy::providers::DynProvider;
use alloy::rpc::types::Log;
use async_trait::async_trait;
use futures::future::BoxFuture;
#[cfg(any(feature = "testing", test))]
use mockall::automock;

use crate::error::{ConnectionError, RpcError};
use crate::provider::{from_transport_error, RpcProvider};
use crate::types::{ContractEvent, TransactionOverrides, TransactionResponse};

/// A live handle to a deployed contract: dynamic method dispatch by name and
/// ABI event decoding.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait ContractHandle: Send + Sync {
    fn address(&self) -> Address;

    /// Performs an idempotent read (`eth_call`) of `method`.
    async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, RpcError>;

    /// Signs and submits a state-changing invocation of `method`, returning
    /// once the transaction is accepted into the mempool.
    async fn submit(
        &self,
        method: &str,
        args: &[DynSolValue],
        overrides: &TransactionOverrides,
    ) -> Result<TransactionResponse, RpcError>;

    /// Decodes `log` against the contract ABI; `None` for foreign events.
    fn decode_event(&self, log: &Log) -> Option<ContractEvent>;
}

impl std::fmt::Debug for dyn ContractHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address())
            .finish()
    }
}

/// Produces a contract handle for `address` against the given provider.
/// Loaders are retained by the registry so every handle can be rebuilt when
/// the provider or the signer changes.
pub type ContractLoader = Arc<
    dyn Fn(
            Address,
            Arc<dyn RpcProvider>,
        ) -> BoxFuture<'static, Result<Arc<dyn ContractHandle>, ConnectionError>>
        + Send
        + Sync,
>;

pub struct AlloyContract {
    address: Address,
    abi: JsonAbi,
    instance: ContractInstance<DynProvider>,
}

impl AlloyContract {
    pub fn new(address: Address, abi: JsonAbi, provider: DynProvider) -> Self {
        let instance = ContractInstance::new(address, provider, Interface::new(abi.clone()));
        Self { address, abi, instance }
    }
}

#[async_trait]
impl ContractHandle for AlloyContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, RpcError> {
        let call = self.instance.function(method, args).map_err(from_contract_error)?;
        call.call().await.map_err(from_contract_error)
    }

    async fn submit(
        &self,
        method: &str,
        args: &[DynSolValue],
        overrides: &TransactionOverrides,
    ) -> Result<TransactionResponse, RpcError> {
        let mut call = self.instance.function(method, args).map_err(from_contract_error)?;
        if let Some(gas_price) = overrides.gas_price {
            call = call.gas_price(gas_price.try_into().unwrap_or(u128::MAX));
        }
        if let Some(gas_limit) = overrides.gas_limit {
            call = call.gas(gas_limit);
        }
        if let Some(value) = overrides.value {
            call = call.value(value);
        }
        if let Some(nonce) = overrides.nonce {
            call = call.nonce(nonce);
        }
        let pending = call.send().await.map_err(from_contract_error)?;
        Ok(TransactionResponse {
            hash: *pending.tx_hash(),
            to: Some(self.address),
            from: None,
            nonce: overrides.nonce,
        })
    }

    fn decode_event(&self, log: &Log) -> Option<ContractEvent> {
        let topic0 = log.inner.data.topics().first()?;
        let event = self.abi.events().find(|event| event.selector() == *topic0)?;
        let decoded = event.decode_log(&log.inner.data).ok()?;
        let mut params = decoded.indexed;
        params.extend(decoded.body);
        Some(ContractEvent { name: event.name.clone(), params })
    }
}

fn from_contract_error(err: alloy::contract::Error) -> RpcError {
    match err {
        alloy::contract::Error::TransportError(transport) => from_transport_error(transport),
        other => RpcError::new(other.to_string()),
    }
}
