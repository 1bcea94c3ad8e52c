//! Feed configuration
//!
//! Describes the known partitions, which one is home, the resource address
//! table and the decode policy. Loaded from JSON and validated before the
//! engine is built.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use types::errors::ConfigError;
use types::ids::{AccountId, Address, PartitionId, ResourceId};

/// Rule deciding whether a decoded resource is complete enough to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityPolicy {
    /// Every critical field must be present; zero is a valid value.
    #[default]
    Present,
    /// Every critical field must be present and non-zero.
    Truthy,
}

/// A known partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: PartitionId,
    /// Human-readable label used in logs.
    pub name: String,
}

/// A resource and its contract address on each partition where it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: ResourceId,
    pub addresses: BTreeMap<PartitionId, Address>,
}

fn default_tick_queue_capacity() -> usize {
    16
}

/// Configuration for the feed engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// All partitions the planner may query, in foreign-query order.
    pub partitions: Vec<PartitionConfig>,
    /// Partition the consumer is currently viewing.
    pub home_partition: PartitionId,
    /// Resource address table.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Account whose balances are read; unbound when absent.
    #[serde(default)]
    pub account: Option<AccountId>,
    /// Partition-encoding symbol prefixes stripped from decoded symbols.
    #[serde(default)]
    pub symbol_prefixes: Vec<String>,
    #[serde(default)]
    pub validity: ValidityPolicy,
    /// Capacity of the transport-to-engine tick queue.
    #[serde(default = "default_tick_queue_capacity")]
    pub tick_queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            partitions: vec![PartitionConfig {
                id: PartitionId::new(1),
                name: "ethereum".to_string(),
            }],
            home_partition: PartitionId::new(1),
            resources: Vec::new(),
            account: None,
            symbol_prefixes: Vec::new(),
            validity: ValidityPolicy::default(),
            tick_queue_capacity: default_tick_queue_capacity(),
        }
    }
}

impl FeedConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "tick_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.partitions.is_empty() {
            return Err(ConfigError::NoPartitions);
        }

        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if !seen.insert(partition.id) {
                return Err(ConfigError::DuplicatePartition(partition.id));
            }
        }

        if !seen.contains(&self.home_partition) {
            return Err(ConfigError::UnknownHome(self.home_partition));
        }

        for resource in &self.resources {
            if let Some(partition) = resource.addresses.keys().find(|p| !seen.contains(p)) {
                return Err(ConfigError::UnknownResourcePartition {
                    resource: resource.id.to_string(),
                    partition: *partition,
                });
            }
        }

        Ok(())
    }

    /// Known partition ids in configured order.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.id).collect()
    }

    pub fn resource_ids(&self) -> BTreeSet<ResourceId> {
        self.resources.iter().map(|r| r.id.clone()).collect()
    }

    pub fn partition_name(&self, id: PartitionId) -> Option<&str> {
        self.partitions
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.as_str())
    }
}
