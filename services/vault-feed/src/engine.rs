//! Feed engine orchestrator
//!
//! Ties together planning, subscription, decoding, change detection and the
//! materialization gate. Planner inputs (resource set, home partition,
//! account) live here; any change re-plans, and the subscription manager
//! re-subscribes only if the resulting plan differs.
//!
//! Ticks are processed one at a time. When several are queued only the
//! newest tick of the live subscription is decoded; ticks from cancelled
//! subscriptions are discarded without touching the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use types::errors::{ConfigError, FeedError};
use types::ids::{AccountId, PartitionId, ResourceId};

use crate::config::FeedConfig;
use crate::decoder::{self, DecodePolicy};
use crate::gate::{GateOutcome, InteractionHandle, MaterializationGate, SharedGate};
use crate::metrics::FeedMetrics;
use crate::planner::QueryPlanner;
use crate::resolver::AddressResolver;
use crate::store::{PublishedStore, StoreReader};
use crate::transport::{ApplyOutcome, BatchTransport, SubscriptionManager, TickEnvelope, TickQueue};

/// What processing one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick from a cancelled subscription; ignored.
    Stale,
    /// Transport reported a failure; store untouched.
    Failed,
    /// Empty result list for a non-empty plan; store untouched.
    NoData,
    /// Result count did not match the plan; tick discarded.
    Misaligned,
    /// Decoded set equal to the latest accepted set.
    Unchanged,
    Published { revision: u64 },
    Deferred,
}

/// Inputs the query plan is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInputs {
    pub resources: BTreeSet<ResourceId>,
    pub home: PartitionId,
    pub account: Option<AccountId>,
}

/// The read-aggregate-publish engine.
pub struct FeedEngine<T, R> {
    planner: QueryPlanner<R>,
    subscriptions: SubscriptionManager<T>,
    ticks: TickQueue,
    inputs: PlanInputs,
    policy: DecodePolicy,
    gate: SharedGate,
    metrics: Arc<FeedMetrics>,
}

impl<T: BatchTransport, R: AddressResolver> FeedEngine<T, R> {
    /// Build an engine from a validated config. Nothing is subscribed until
    /// [`start`](Self::start).
    pub fn new(config: &FeedConfig, transport: T, resolver: R) -> Result<Self, FeedError> {
        config.validate()?;

        let metrics = Arc::new(FeedMetrics::new());
        let ticks = TickQueue::new(config.tick_queue_capacity, metrics.clone());
        let gate = SharedGate::new(MaterializationGate::new(PublishedStore::new()));

        info!(
            partitions = config.partitions.len(),
            home = %config.home_partition,
            resources = config.resources.len(),
            validity = ?config.validity,
            "FeedEngine initialized"
        );

        Ok(Self {
            planner: QueryPlanner::new(resolver, config.partition_ids()),
            subscriptions: SubscriptionManager::new(transport, ticks.clone()),
            ticks,
            inputs: PlanInputs {
                resources: config.resource_ids(),
                home: config.home_partition,
                account: config.account,
            },
            policy: DecodePolicy::from_config(config),
            gate,
            metrics,
        })
    }

    /// Plan from the current inputs and subscribe.
    pub fn start(&mut self) -> Result<ApplyOutcome, FeedError> {
        self.replan()
    }

    /// Switch the home partition. `home` must be one of the known partitions.
    pub fn set_home_partition(&mut self, home: PartitionId) -> Result<ApplyOutcome, FeedError> {
        if !self.planner.partitions().contains(&home) {
            return Err(ConfigError::UnknownHome(home).into());
        }
        self.inputs.home = home;
        self.replan()
    }

    pub fn set_account(&mut self, account: Option<AccountId>) -> Result<ApplyOutcome, FeedError> {
        self.inputs.account = account;
        self.replan()
    }

    pub fn set_resources(
        &mut self,
        resources: BTreeSet<ResourceId>,
    ) -> Result<ApplyOutcome, FeedError> {
        self.inputs.resources = resources;
        self.replan()
    }

    fn replan(&mut self) -> Result<ApplyOutcome, FeedError> {
        let plan = self
            .planner
            .plan(&self.inputs.resources, self.inputs.home, self.inputs.account);

        debug!(
            descriptors = plan.expected_results(),
            resources = plan.resource_count(),
            home = %plan.home(),
            "Query plan computed"
        );

        let outcome = self.subscriptions.apply(&plan)?;
        if let ApplyOutcome::Resubscribed { .. } = outcome {
            self.metrics.record_resubscription();
        }
        Ok(outcome)
    }

    /// Process a single tick.
    pub fn handle_tick(&mut self, envelope: TickEnvelope) -> TickOutcome {
        self.metrics.record_tick_received();

        if !self.subscriptions.is_current(envelope.subscription) {
            self.metrics.record_stale();
            debug!(
                subscription_id = %envelope.subscription,
                block = envelope.block,
                "Discarding tick from cancelled subscription"
            );
            return TickOutcome::Stale;
        }
        let Some(plan) = self.subscriptions.current_plan() else {
            self.metrics.record_stale();
            return TickOutcome::Stale;
        };

        let results = match envelope.outcome {
            Ok(results) => results,
            Err(e) => {
                self.metrics.record_failed();
                warn!(
                    subscription_id = %envelope.subscription,
                    block = envelope.block,
                    error = %e,
                    "Tick failed, keeping previous record set"
                );
                return TickOutcome::Failed;
            }
        };

        if results.is_empty() && !plan.is_empty() {
            debug!(block = envelope.block, "Empty tick for non-empty plan, no data yet");
            return TickOutcome::NoData;
        }

        let started = Instant::now();
        let decoded = match decoder::decode(&results, plan, &self.policy) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.record_misaligned();
                error!(
                    subscription_id = %envelope.subscription,
                    block = envelope.block,
                    error = %e,
                    "Misaligned tick discarded"
                );
                return TickOutcome::Misaligned;
            }
        };
        self.metrics.record_tick_processed(
            started.elapsed().as_nanos() as u64,
            decoded.dropped.len() as u64,
        );

        let record_count = decoded.records.len();
        match self.gate.offer(decoded.records) {
            GateOutcome::Unchanged => {
                self.metrics.record_unchanged();
                debug!(block = envelope.block, "Record set unchanged");
                TickOutcome::Unchanged
            }
            GateOutcome::Published { revision } => {
                self.metrics.record_publish();
                info!(block = envelope.block, revision, records = record_count, "Record set published");
                TickOutcome::Published { revision }
            }
            GateOutcome::Deferred => {
                self.metrics.record_deferred();
                debug!(block = envelope.block, records = record_count, "Record set deferred");
                TickOutcome::Deferred
            }
        }
    }

    /// Process whatever is queued, newest live tick only.
    ///
    /// Returns the outcome of the tick that was decoded, or `None` if the
    /// queue held nothing from the live subscription.
    pub fn drain_ticks(&mut self) -> Option<TickOutcome> {
        let first = self.ticks.try_recv()?;
        self.process_batch(first)
    }

    /// Wait for the next tick and process it (plus anything queued behind it).
    pub async fn next_tick(&mut self) -> Option<TickOutcome> {
        let first = self.ticks.recv().await;
        self.process_batch(first)
    }

    fn process_batch(&mut self, first: TickEnvelope) -> Option<TickOutcome> {
        let mut newest: Option<TickEnvelope> = None;
        let mut pending = Some(first);

        while let Some(envelope) = pending.take().or_else(|| self.ticks.try_recv()) {
            if !self.subscriptions.is_current(envelope.subscription) {
                self.handle_tick(envelope);
                continue;
            }
            if let Some(superseded) = newest.replace(envelope) {
                self.metrics.record_tick_received();
                self.metrics.record_coalesced(1);
                debug!(block = superseded.block, "Tick superseded by a newer one");
            }
        }

        newest.map(|envelope| self.handle_tick(envelope))
    }

    /// Consumer-side interaction entry points.
    pub fn interaction(&self) -> InteractionHandle {
        InteractionHandle::new(self.gate.clone()).with_metrics(self.metrics.clone())
    }

    pub fn reader(&self) -> StoreReader {
        self.gate.reader()
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    pub fn inputs(&self) -> &PlanInputs {
        &self.inputs
    }

    pub fn subscriptions(&self) -> &SubscriptionManager<T> {
        &self.subscriptions
    }

    /// Cancel the live subscription.
    pub fn stop(&mut self) {
        self.subscriptions.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticAddressBook;
    use crate::transport::{CancelHandle, TickSink};
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use types::errors::TransportError;
    use types::ids::Address;
    use types::query::{QueryDescriptor, RawResult};

    const ETH: PartitionId = PartitionId::new(1);

    /// Hands out sinks so tests can push ticks by hand.
    #[derive(Default, Clone)]
    struct ManualTransport {
        sinks: Arc<Mutex<Vec<TickSink>>>,
    }

    impl ManualTransport {
        fn latest(&self) -> TickSink {
            self.sinks.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl BatchTransport for ManualTransport {
        fn subscribe(
            &self,
            _descriptors: &[QueryDescriptor],
            sink: TickSink,
        ) -> Result<CancelHandle, TransportError> {
            self.sinks.lock().unwrap().push(sink);
            Ok(CancelHandle::noop())
        }
    }

    fn config() -> FeedConfig {
        let mut config = FeedConfig::default();
        config.resources = vec![crate::config::ResourceConfig {
            id: ResourceId::new("DAI"),
            addresses: [(ETH, Address::from_bytes([4u8; 20]))].into_iter().collect(),
        }];
        config
    }

    fn engine() -> (FeedEngine<ManualTransport, StaticAddressBook>, ManualTransport) {
        engine_with(config())
    }

    fn engine_with(
        config: FeedConfig,
    ) -> (FeedEngine<ManualTransport, StaticAddressBook>, ManualTransport) {
        let transport = ManualTransport::default();
        let mut engine =
            FeedEngine::new(&config, transport.clone(), StaticAddressBook::from_config(&config)).unwrap();
        engine.start().unwrap();
        (engine, transport)
    }

    fn dai(total: u64) -> Vec<RawResult> {
        vec![
            RawResult::text("DAI"),
            RawResult::uint(18u64),
            RawResult::uint(total),
            RawResult::rate(Decimal::from_str_exact("3.2").unwrap()),
            RawResult::uint(1u64),
        ]
    }

    #[test]
    fn test_tick_publishes() {
        let (mut engine, transport) = engine();
        transport.latest().deliver(1, Ok(dai(100)));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Published { revision: 1 }));
        assert!(!engine.reader().current_set().loading);
    }

    #[test]
    fn test_failed_tick_keeps_loading() {
        let (mut engine, transport) = engine();
        transport.latest().deliver(
            1,
            Err(TransportError::ExecutionFailed {
                block: 1,
                reason: "rpc down".to_string(),
            }),
        );

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Failed));
        let set = engine.reader().current_set();
        assert!(set.loading);
        assert_eq!(set.revision, 0);
    }

    #[test]
    fn test_failed_tick_keeps_previous_records() {
        let (mut engine, transport) = engine();
        transport.latest().deliver(1, Ok(dai(100)));
        engine.drain_ticks();

        transport.latest().deliver(2, Err(TransportError::ChannelClosed));
        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Failed));
        assert_eq!(engine.reader().current_set().len(), 1);
    }

    #[test]
    fn test_misaligned_tick_discarded() {
        let (mut engine, transport) = engine();
        let mut results = dai(100);
        results.pop();
        transport.latest().deliver(1, Ok(results));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Misaligned));
        assert!(engine.reader().current_set().loading);
        assert_eq!(engine.metrics().export()["ticks_misaligned"], 1);
    }

    #[test]
    fn test_empty_tick_for_non_empty_plan_is_no_data() {
        let (mut engine, transport) = engine();
        transport.latest().deliver(1, Ok(Vec::new()));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::NoData));
        assert!(engine.reader().current_set().loading);
    }

    #[test]
    fn test_queued_ticks_coalesce_to_newest() {
        let (mut engine, transport) = engine();
        let sink = transport.latest();
        sink.deliver(1, Ok(dai(100)));
        sink.deliver(2, Ok(dai(200)));
        sink.deliver(3, Ok(dai(300)));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Published { revision: 1 }));
        let set = engine.reader().current_set();
        assert_eq!(set.records[0].total_value_locked.amount, 300u64.into());
        assert_eq!(engine.metrics().export()["ticks_coalesced"], 2);
        assert_eq!(engine.drain_ticks(), None);
    }

    #[test]
    fn test_single_slot_queue_keeps_newest_block() {
        let (mut engine, transport) = engine_with(FeedConfig {
            tick_queue_capacity: 1,
            ..config()
        });
        let sink = transport.latest();
        assert!(sink.deliver(1, Ok(dai(100))));
        assert!(sink.deliver(2, Ok(dai(200))));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Published { revision: 1 }));
        let set = engine.reader().current_set();
        assert_eq!(set.records[0].total_value_locked.amount, 200u64.into());
        assert_eq!(engine.drain_ticks(), None);
    }

    #[test]
    fn test_leftover_ticks_do_not_block_new_subscription() {
        let (mut engine, transport) = engine_with(FeedConfig {
            tick_queue_capacity: 2,
            ..config()
        });
        let old = transport.latest();
        old.deliver(1, Ok(dai(100)));
        old.deliver(2, Ok(dai(100)));

        engine
            .set_account(Some(AccountId::new(Address::from_bytes([9u8; 20]))))
            .unwrap();
        // Still in flight when the cancel landed.
        old.deliver(3, Ok(dai(100)));
        old.deliver(4, Ok(dai(100)));
        assert!(transport.latest().deliver(5, Ok(dai(500))));

        assert_eq!(engine.drain_ticks(), Some(TickOutcome::Published { revision: 1 }));
        let set = engine.reader().current_set();
        assert!(!set.loading);
        assert_eq!(set.records[0].total_value_locked.amount, 500u64.into());
        assert_eq!(engine.metrics().export()["ticks_stale"], 4);
    }

    #[test]
    fn test_account_change_resubscribes() {
        let (mut engine, transport) = engine();
        let account = AccountId::new(Address::from_bytes([9u8; 20]));

        assert!(matches!(
            engine.set_account(Some(account)).unwrap(),
            ApplyOutcome::Resubscribed { .. }
        ));
        assert_eq!(transport.sinks.lock().unwrap().len(), 2);
        assert_eq!(engine.set_account(Some(account)).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_unknown_home_rejected() {
        let (mut engine, transport) = engine();
        let result = engine.set_home_partition(PartitionId::new(999));

        assert!(matches!(
            result,
            Err(FeedError::Config(ConfigError::UnknownHome(_)))
        ));
        assert_eq!(engine.inputs().home, ETH);
        assert_eq!(transport.sinks.lock().unwrap().len(), 1);
    }
}
