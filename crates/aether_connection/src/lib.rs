pub mod connection;
pub mod contract;
pub mod error;
pub mod gas;
#[cfg(test)]
mod gas_test;
pub mod provider;
pub mod receipt;
pub mod types;
pub mod watcher;

pub use aether_gas_oracle::GasPrices;
pub use connection::{ConnectionApi, ConnectionConfig, EthereumConnection, ProviderFactory};
#[cfg(any(feature = "testing", test))]
pub use connection::MockConnectionApi;
pub use contract::{ContractHandle, ContractLoader};
#[cfg(any(feature = "testing", test))]
pub use contract::MockContractHandle;
pub use error::{ConnectionError, RpcError};
pub use gas::{auto_gas_price_gwei, GasSetting};
pub use provider::RpcProvider;
#[cfg(any(feature = "testing", test))]
pub use provider::MockRpcProvider;
pub use receipt::wait_for_transaction;
pub use types::{ContractEvent, TransactionOverrides, TransactionResponse, TxReceipt};
pub use watcher::{ContractEventHandlers, EventHandler};
