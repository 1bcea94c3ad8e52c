//! Async runtime tests
//!
//! Runs the engine on tokio against `SimulatedChain`, which executes the
//! subscribed descriptors on its own task for every block.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use types::errors::{ConfigError, FeedError, TransportError};
use types::ids::{AccountId, Address, PartitionId, ResourceId};
use types::numeric::U256;
use types::query::QueryDescriptor;
use types::record::PublishedSet;
use vault_feed::config::{PartitionConfig, ResourceConfig};
use vault_feed::gate::FlushOutcome;
use vault_feed::resolver::StaticAddressBook;
use vault_feed::simulated::{SimulatedChain, VaultState};
use vault_feed::store::StoreReader;
use vault_feed::transport::{ApplyOutcome, BatchTransport, CancelHandle, TickSink};
use vault_feed::{FeedConfig, FeedEngine, FeedHandle, FeedRuntime};

const ETH: PartitionId = PartitionId::new(1);
const ARB: PartitionId = PartitionId::new(42161);

fn usdc_on(partitions: &[(PartitionId, u8)]) -> ResourceConfig {
    ResourceConfig {
        id: ResourceId::new("USDC"),
        addresses: partitions
            .iter()
            .map(|(p, tag)| (*p, Address::from_bytes([*tag; 20])))
            .collect(),
    }
}

fn config() -> FeedConfig {
    FeedConfig {
        partitions: vec![
            PartitionConfig {
                id: ETH,
                name: "ethereum".to_string(),
            },
            PartitionConfig {
                id: ARB,
                name: "arbitrum".to_string(),
            },
        ],
        home_partition: ETH,
        resources: vec![usdc_on(&[(ETH, 1), (ARB, 2)])],
        symbol_prefixes: vec!["ls".to_string()],
        ..FeedConfig::default()
    }
}

fn seeded_chain() -> SimulatedChain {
    let chain = SimulatedChain::new();
    for (partition, tag, total) in [(ETH, 1u8, 100u64), (ARB, 2u8, 50u64)] {
        let at = Address::from_bytes([tag; 20]);
        chain.set_vault(
            partition,
            at,
            &VaultState {
                symbol: "lsUSDC".to_string(),
                decimals: 6,
                total_assets: U256::from(total),
                apr: Decimal::new(512, 2),
            },
        );
        chain.set_balance(partition, at, AccountId::UNBOUND, U256::from(3u64));
    }
    chain
}

async fn next(reader: &mut StoreReader) -> PublishedSet {
    tokio::time::timeout(Duration::from_secs(5), reader.changed())
        .await
        .expect("timed out waiting for publish")
        .expect("store dropped")
}

/// Wait until the engine has taken `count` ticks off its queue.
async fn wait_for_ticks(feed: &FeedHandle, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while feed.metrics().export()["ticks_received"] < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for ticks");
}

fn tvl(set: &PublishedSet) -> U256 {
    set.records[0].total_value_locked.amount
}

/// `SimulatedChain` whose subscribe calls can be made to fail.
#[derive(Clone)]
struct FlakyChain {
    chain: SimulatedChain,
    offline: Arc<AtomicBool>,
}

impl BatchTransport for FlakyChain {
    fn subscribe(
        &self,
        descriptors: &[QueryDescriptor],
        sink: TickSink,
    ) -> Result<CancelHandle, TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed {
                reason: "node offline".to_string(),
            });
        }
        self.chain.subscribe(descriptors, sink)
    }
}

#[tokio::test]
async fn test_initial_read_publishes_aggregated_set() {
    let config = config();
    let chain = seeded_chain();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();

    let set = next(&mut reader).await;
    assert!(!set.loading);
    assert_eq!(set.records[0].resource_id, ResourceId::new("USDC"));
    assert_eq!(tvl(&set), U256::from(150u64));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_new_block_with_changed_state_republishes() {
    let config = config();
    let chain = seeded_chain();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    chain.set_total_assets(ARB, Address::from_bytes([2u8; 20]), U256::from(80u64));
    chain.new_block();

    let set = next(&mut reader).await;
    assert_eq!(set.revision, 2);
    assert_eq!(tvl(&set), U256::from(180u64));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_block_keeps_previous_set() {
    let config = config();
    let chain = seeded_chain();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    chain.fail_next_tick("rpc unavailable");
    chain.new_block();
    wait_for_ticks(&feed, 2).await;
    assert_eq!(feed.metrics().export()["ticks_failed"], 1);
    assert_eq!(tvl(&reader.current_set()), U256::from(150u64));

    chain.set_total_assets(ETH, Address::from_bytes([1u8; 20]), U256::from(120u64));
    chain.new_block();

    let set = next(&mut reader).await;
    assert_eq!(tvl(&set), U256::from(170u64));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interaction_defers_until_end() {
    let config = config();
    let chain = seeded_chain();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    let interaction = feed.interaction();
    assert!(interaction.begin_interaction());

    let eth = Address::from_bytes([1u8; 20]);
    chain.set_total_assets(ETH, eth, U256::from(200u64));
    chain.new_block();
    chain.set_total_assets(ETH, eth, U256::from(300u64));
    chain.new_block();

    wait_for_ticks(&feed, 3).await;
    assert_eq!(tvl(&reader.current_set()), U256::from(150u64));

    assert!(matches!(interaction.end_interaction(), FlushOutcome::Flushed { .. }));
    let set = next(&mut reader).await;
    assert_eq!(tvl(&set), U256::from(350u64));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_home_switch_replans_on_running_engine() {
    let config = config();
    let chain = seeded_chain();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    chain.set_balance(ARB, Address::from_bytes([2u8; 20]), AccountId::UNBOUND, U256::from(11u64));
    let outcome = feed.set_home_partition(ARB).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Resubscribed { previous: Some(_), .. }));

    let set = next(&mut reader).await;
    assert_eq!(set.records[0].invested_amount.amount, U256::from(11u64));
    assert_eq!(tvl(&set), U256::from(150u64));
    assert_eq!(feed.metrics().export()["resubscriptions"], 2);

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_home_is_returned_to_caller() {
    let config = config();
    let engine =
        FeedEngine::new(&config, seeded_chain(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    let result = feed.set_home_partition(PartitionId::new(999)).await;
    assert!(matches!(
        result,
        Err(FeedError::Config(ConfigError::UnknownHome(_)))
    ));
    assert_eq!(feed.metrics().export()["resubscriptions"], 1);

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_resubscribe_is_returned_and_retried() {
    let config = config();
    let transport = FlakyChain {
        chain: seeded_chain(),
        offline: Arc::new(AtomicBool::new(false)),
    };
    let engine =
        FeedEngine::new(&config, transport.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    transport.offline.store(true, Ordering::SeqCst);
    let result = feed.set_home_partition(ARB).await;
    assert!(matches!(
        result,
        Err(FeedError::Transport(TransportError::SubscribeFailed { .. }))
    ));

    transport.offline.store(false, Ordering::SeqCst);
    transport.chain.set_balance(
        ARB,
        Address::from_bytes([2u8; 20]),
        AccountId::UNBOUND,
        U256::from(11u64),
    );
    let outcome = feed.set_home_partition(ARB).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Resubscribed { previous: None, .. }));
    let set = next(&mut reader).await;
    assert_eq!(set.revision, 2);
    assert_eq!(set.records[0].invested_amount.amount, U256::from(11u64));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_resource_set_publishes_empty() {
    let config = FeedConfig {
        resources: Vec::new(),
        ..config()
    };
    let chain = SimulatedChain::new();
    let engine =
        FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config)).unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    assert!(reader.current_set().loading);

    let set = next(&mut reader).await;
    assert!(set.is_empty());
    assert!(!set.loading);

    feed.set_resources(BTreeSet::from([ResourceId::new("USDC")]))
        .await
        .unwrap();
    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_reader() {
    let config = config();
    let engine = FeedEngine::new(
        &config,
        seeded_chain(),
        StaticAddressBook::from_config(&config),
    )
    .unwrap();
    let feed = FeedRuntime::spawn(engine).unwrap();
    let mut reader = feed.reader();
    next(&mut reader).await;

    feed.shutdown().await.unwrap();
    assert!(reader.changed().await.is_err());
}
