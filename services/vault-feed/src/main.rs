use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;
use types::ids::{AccountId, Address, PartitionId, ResourceId};
use types::numeric::U256;
use types::record::PublishedSet;
use vault_feed::config::{PartitionConfig, ResourceConfig};
use vault_feed::gate::FlushOutcome;
use vault_feed::metrics::AlertThresholds;
use vault_feed::resolver::StaticAddressBook;
use vault_feed::simulated::{SimulatedChain, VaultState};
use vault_feed::{FeedConfig, FeedEngine, FeedRuntime, SERVICE_VERSION};

const ETHEREUM: PartitionId = PartitionId::new(1);
const OPTIMISM: PartitionId = PartitionId::new(10);
const ARBITRUM: PartitionId = PartitionId::new(42161);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = SERVICE_VERSION, "Starting vault feed");

    let config = match std::env::args().nth(1) {
        Some(path) => FeedConfig::from_file(&path).with_context(|| format!("loading config from {}", path))?,
        None => demo_config(),
    };
    config.validate().context("invalid feed config")?;

    let chain = SimulatedChain::new();
    let account = config.account.unwrap_or(AccountId::UNBOUND);
    seed(&chain, &config, account);

    let engine = FeedEngine::new(&config, chain.clone(), StaticAddressBook::from_config(&config))?;
    let feed = FeedRuntime::spawn(engine)?;
    let mut reader = feed.reader();

    // Initial read happens on subscribe.
    log_set("initial", &reader.changed().await?);

    for round in 1..=3u64 {
        for resource in &config.resources {
            for (&partition, &address) in &resource.addresses {
                chain.set_total_assets(partition, address, U256::from(1_000_000u64 * (round + 1)));
            }
        }
        chain.new_block();
        log_set("block", &reader.changed().await?);
    }

    // Updates arriving during an interaction are held back until it ends.
    let interaction = feed.interaction();
    interaction.begin_interaction();
    for resource in &config.resources {
        for (&partition, &address) in &resource.addresses {
            chain.set_total_assets(partition, address, U256::from(9_000_000u64));
        }
    }
    chain.new_block();
    tokio::time::sleep(Duration::from_millis(50)).await;
    log_set("during interaction", &reader.current_set());
    let flush = interaction.end_interaction();
    tracing::info!(?flush, "Interaction ended");
    if let FlushOutcome::Flushed { .. } = flush {
        log_set("after interaction", &reader.changed().await?);
    }

    if let Some(other) = config
        .partitions
        .iter()
        .map(|p| p.id)
        .find(|id| *id != config.home_partition)
    {
        tracing::info!(
            from = config.partition_name(config.home_partition).unwrap_or("?"),
            to = config.partition_name(other).unwrap_or("?"),
            "Switching home partition"
        );
        feed.set_home_partition(other).await?;
        log_set("home switched", &reader.changed().await?);
    }

    for alert in feed.metrics().check_thresholds(&AlertThresholds::default()) {
        tracing::warn!(level = ?alert.level, metric = %alert.metric, "{}", alert.message);
    }
    let snapshot = feed.metrics().snapshot();
    tracing::info!(metrics = %serde_json::to_string(&snapshot)?, "Feed metrics");

    feed.shutdown().await?;
    tracing::info!("Vault feed stopped");

    Ok(())
}

fn log_set(stage: &str, set: &PublishedSet) {
    tracing::info!(
        stage,
        revision = set.revision,
        loading = set.loading,
        records = set.len(),
        "Published set"
    );
    for record in set.records.iter() {
        tracing::info!(
            stage,
            resource = %record.resource_id,
            apr = %record.apr,
            tvl = %record.total_value_locked.amount,
            invested = %record.invested_amount.amount,
            "Record"
        );
    }
}

fn seed(chain: &SimulatedChain, config: &FeedConfig, account: AccountId) {
    for resource in &config.resources {
        for (&partition, &address) in &resource.addresses {
            chain.set_vault(
                partition,
                address,
                &VaultState {
                    symbol: format!("ls{}", resource.id),
                    decimals: 6,
                    total_assets: U256::from(1_000_000u64),
                    apr: Decimal::new(425, 2),
                },
            );
            chain.set_balance(partition, address, account, U256::from(2_500u64));
        }
    }
}

fn demo_config() -> FeedConfig {
    let vault = |tag: u8, partitions: &[PartitionId]| -> BTreeMap<PartitionId, Address> {
        partitions
            .iter()
            .map(|p| (*p, Address::from_bytes([tag.wrapping_add(p.as_u64() as u8); 20])))
            .collect()
    };

    FeedConfig {
        partitions: vec![
            PartitionConfig {
                id: ETHEREUM,
                name: "ethereum".to_string(),
            },
            PartitionConfig {
                id: OPTIMISM,
                name: "optimism".to_string(),
            },
            PartitionConfig {
                id: ARBITRUM,
                name: "arbitrum".to_string(),
            },
        ],
        home_partition: ETHEREUM,
        resources: vec![
            ResourceConfig {
                id: ResourceId::new("USDC"),
                addresses: vault(0x10, &[ETHEREUM, OPTIMISM, ARBITRUM]),
            },
            ResourceConfig {
                id: ResourceId::new("DAI"),
                addresses: vault(0x40, &[ETHEREUM, ARBITRUM]),
            },
        ],
        account: Some(AccountId::new(Address::from_bytes([0xAA; 20]))),
        symbol_prefixes: vec!["ls".to_string()],
        ..FeedConfig::default()
    }
}
