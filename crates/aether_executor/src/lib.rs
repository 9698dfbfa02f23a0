pub mod caller;
pub mod executor;

pub use caller::{CallError, ContractCaller, ContractCallerConfig};
pub use executor::{
    AfterTransactionHook,
    BeforeTransactionHook,
    ConfirmedTransaction,
    ExecutorHooks,
    GasSettingProvider,
    PendingTransaction,
    QueuedTransaction,
    ReceiptError,
    SubmitError,
    SubmittedTransaction,
    TransactionExecutor,
    TransactionExecutorConfig,
    TransactionHooks,
    TransactionLogEvent,
};
