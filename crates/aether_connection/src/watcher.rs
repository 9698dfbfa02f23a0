use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use aether_infra_utils::debounce::Debouncer;
use alloy::rpc::types::Filter;
use tracing::{trace, warn};

use crate::connection::EthereumConnection;
use crate::contract::ContractHandle;
use crate::error::ConnectionError;
use crate::types::ContractEvent;

pub type EventHandler = Box<dyn Fn(ContractEvent) + Send + Sync>;

/// Named handlers for a contract's events. Events without a registered
/// handler are ignored.
#[derive(Default)]
pub struct ContractEventHandlers {
    handlers: HashMap<String, EventHandler>,
}

impl ContractEventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        event_name: impl Into<String>,
        handler: impl Fn(ContractEvent) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(event_name.into(), Box::new(handler));
        self
    }

    fn dispatch(&self, event: ContractEvent) {
        let Some(handler) = self.handlers.get(&event.name) else {
            trace!("No handler registered for contract event {}.", event.name);
            return;
        };
        let name = event.name.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            warn!("Handler for contract event {name} panicked.");
        }
    }
}

impl EthereumConnection {
    /// Watches the chain head and fans contract logs out to `handlers`.
    ///
    /// Head announcements are debounced (leading and trailing edges) so a
    /// burst of blocks triggers one processing pass. Each pass records and
    /// publishes the new block number, then fetches the logs of every block
    /// since the previous pass and dispatches the ones `contract` can decode.
    pub async fn subscribe_to_contract_events(
        self: &Arc<Self>,
        contract: Arc<dyn ContractHandle>,
        handlers: ContractEventHandlers,
        filter: Filter,
    ) -> Result<(), ConnectionError> {
        let mut blocks = self.provider().block_stream().await?;
        let (debouncer, mut debounced) =
            Debouncer::new(Duration::from_millis(self.config.block_debounce_ms));

        let feed = tokio::spawn(async move {
            while let Some(number) = blocks.recv().await {
                debouncer.signal(number);
            }
        });

        let connection = Arc::downgrade(self);
        let process = tokio::spawn(async move {
            while let Some(latest) = debounced.recv().await {
                let Some(connection) = connection.upgrade() else { return };
                connection.process_new_block(latest, contract.as_ref(), &handlers, &filter).await;
            }
        });

        let mut tasks = self.tasks.lock().expect("Task list lock poisoned.");
        tasks.push(feed);
        tasks.push(process);
        Ok(())
    }

    async fn process_new_block(
        &self,
        latest: u64,
        contract: &dyn ContractHandle,
        handlers: &ContractEventHandlers,
        filter: &Filter,
    ) {
        let previous = self.block_number.swap(latest, Ordering::SeqCst);
        self.block_number_events.publish(latest);

        let from_block = (previous + 1).min(latest);
        let range = filter.clone().from_block(from_block).to_block(latest);
        match self.provider().logs(&range).await {
            Ok(logs) => {
                trace!("Processing {} logs in blocks [{from_block}, {latest}].", logs.len());
                for log in logs {
                    if let Some(event) = contract.decode_event(&log) {
                        handlers.dispatch(event);
                    }
                }
            }
            Err(err) => warn!("Fetching logs for blocks [{from_block}, {latest}] failed: {err}"),
        }
    }
}
