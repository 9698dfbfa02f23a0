use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, TxHash, U256};

/// Per-transaction override fields layered over the executor defaults.
/// Unset fields fall through to the defaults (or to the provider's fillers).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionOverrides {
    /// Gas price in wei.
    pub gas_price: Option<U256>,
    pub gas_limit: Option<u64>,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
}

/// The mempool-acceptance view of a submitted transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionResponse {
    pub hash: TxHash,
    pub to: Option<Address>,
    pub from: Option<Address>,
    pub nonce: Option<u64>,
}

/// Post-mining record of a transaction. `status` is `true` for success and
/// `false` for a revert.
#[derive(Clone, Debug, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub status: bool,
    pub gas_used: u64,
}

/// An ABI-decoded contract event: the event name and its parameters, indexed
/// parameters first, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct ContractEvent {
    pub name: String,
    pub params: Vec<DynSolValue>,
}
