//! In-memory chain transport
//!
//! Stands in for a multi-partition RPC backend: values are keyed by query
//! descriptor, blocks are produced on demand, and every subscription runs
//! its own task that re-executes the descriptor list on each new block.
//! A subscription also executes once immediately after subscribing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rust_decimal::Decimal;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};
use types::errors::TransportError;
use types::ids::{AccountId, Address, PartitionId};
use types::numeric::U256;
use types::query::{Operation, QueryArg, QueryDescriptor, QueryValue, RawResult};

use crate::transport::{BatchTransport, CancelHandle, TickSink};

const BLOCK_CHANNEL_CAPACITY: usize = 64;

/// What one vault contract answers for its account-independent reads.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultState {
    pub symbol: String,
    pub decimals: u8,
    pub total_assets: U256,
    pub apr: Decimal,
}

#[derive(Debug, Clone)]
enum Slot {
    Value(QueryValue),
    Revert(String),
}

struct ChainInner {
    slots: RwLock<HashMap<QueryDescriptor, Slot>>,
    blocks: broadcast::Sender<u64>,
    block_number: AtomicU64,
    pending_failure: Mutex<Option<String>>,
}

/// Shared handle to the simulated chain.
#[derive(Clone)]
pub struct SimulatedChain {
    inner: Arc<ChainInner>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(BLOCK_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ChainInner {
                slots: RwLock::new(HashMap::new()),
                blocks,
                block_number: AtomicU64::new(0),
                pending_failure: Mutex::new(None),
            }),
        }
    }

    /// Set the value `descriptor` returns from the next block on.
    pub fn set_value(&self, descriptor: QueryDescriptor, value: QueryValue) {
        self.slots_mut().insert(descriptor, Slot::Value(value));
    }

    /// Seed every account-independent read of the vault at `address`.
    pub fn set_vault(&self, partition: PartitionId, address: Address, vault: &VaultState) {
        let mut slots = self.slots_mut();
        let read = |operation| QueryDescriptor::new(partition, address, operation);
        slots.insert(read(Operation::Symbol), Slot::Value(QueryValue::Text(vault.symbol.clone())));
        slots.insert(
            read(Operation::Decimals),
            Slot::Value(QueryValue::Uint(U256::from(vault.decimals))),
        );
        slots.insert(read(Operation::TotalAssets), Slot::Value(QueryValue::Uint(vault.total_assets)));
        slots.insert(read(Operation::Apr), Slot::Value(QueryValue::Rate(vault.apr)));
    }

    pub fn set_total_assets(&self, partition: PartitionId, address: Address, total: U256) {
        self.set_value(
            QueryDescriptor::new(partition, address, Operation::TotalAssets),
            QueryValue::Uint(total),
        );
    }

    pub fn set_balance(&self, partition: PartitionId, address: Address, account: AccountId, balance: U256) {
        self.set_value(
            QueryDescriptor::new(partition, address, Operation::BalanceOf)
                .with_arg(QueryArg::Account(account)),
            QueryValue::Uint(balance),
        );
    }

    /// Make `descriptor` return nothing.
    pub fn remove_value(&self, descriptor: &QueryDescriptor) {
        self.slots_mut().remove(descriptor);
    }

    /// Make `descriptor` revert with `reason`.
    pub fn revert_call(&self, descriptor: QueryDescriptor, reason: impl Into<String>) {
        self.slots_mut().insert(descriptor, Slot::Revert(reason.into()));
    }

    /// Fail the whole next batch execution.
    pub fn fail_next_tick(&self, reason: impl Into<String>) {
        *self
            .inner
            .pending_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Produce a block, notifying every live subscription.
    pub fn new_block(&self) -> u64 {
        let block = self.inner.block_number.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers just means nothing is subscribed.
        let _ = self.inner.blocks.send(block);
        debug!(block, "New block");
        block
    }

    pub fn block_number(&self) -> u64 {
        self.inner.block_number.load(Ordering::SeqCst)
    }

    /// Execute a descriptor list against the current state.
    pub fn execute(&self, descriptors: &[QueryDescriptor]) -> Result<Vec<RawResult>, TransportError> {
        let block = self.block_number();
        if let Some(reason) = self
            .inner
            .pending_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(TransportError::ExecutionFailed { block, reason });
        }

        let slots = self
            .inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(descriptors
            .iter()
            .map(|descriptor| match slots.get(descriptor) {
                Some(Slot::Value(value)) => RawResult::value(value.clone()),
                Some(Slot::Revert(reason)) => RawResult::failed(reason.clone()),
                None => RawResult::Absent,
            })
            .collect())
    }

    fn slots_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<QueryDescriptor, Slot>> {
        self.inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run_tick(&self, descriptors: &[QueryDescriptor], sink: &TickSink, block: u64) {
        let outcome = self.execute(descriptors);
        if !sink.deliver(block, outcome) {
            debug!(subscription_id = %sink.subscription(), block, "Tick not delivered");
        }
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchTransport for SimulatedChain {
    fn subscribe(
        &self,
        descriptors: &[QueryDescriptor],
        sink: TickSink,
    ) -> Result<CancelHandle, TransportError> {
        let runtime = Handle::try_current().map_err(|e| TransportError::SubscribeFailed {
            reason: e.to_string(),
        })?;

        let chain = self.clone();
        let descriptors = descriptors.to_vec();
        let mut blocks = self.inner.blocks.subscribe();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        runtime.spawn(async move {
            chain.run_tick(&descriptors, &sink, chain.block_number());

            loop {
                tokio::select! {
                    biased;

                    _ = &mut cancel_rx => break,
                    block = blocks.recv() => match block {
                        Ok(block) => {
                            if sink.is_closed() {
                                break;
                            }
                            chain.run_tick(&descriptors, &sink, block);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                subscription_id = %sink.subscription(),
                                skipped,
                                "Subscription lagged behind block stream"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(subscription_id = %sink.subscription(), "Subscription task finished");
        });

        Ok(CancelHandle::new(move || {
            let _ = cancel_tx.send(());
        }))
    }
}
