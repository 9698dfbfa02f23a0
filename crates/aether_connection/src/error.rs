use alloy::primitives::{Address, TxHash};
use thiserror::Error;

/// A failed interaction with the RPC endpoint. `body` carries the raw error
/// payload bytes when the node attached one (e.g. revert data), for
/// best-effort decoding by instrumentation.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{message}")]
pub struct RpcError {
    pub message: String,
    pub body: Option<Vec<u8>>,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), body: None }
    }

    pub fn with_body(message: impl Into<String>, body: Vec<u8>) -> Self {
        Self { message: message.into(), body: Some(body) }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("No signer is configured")]
    NoSigner,
    #[error("Contract at {0} was never loaded")]
    ContractNotLoaded(Address),
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("No receipt obtained for transaction {0}")]
    ReceiptUnavailable(TxHash),
    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),
}
