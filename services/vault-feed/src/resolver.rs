//! Address resolution for resources on partitions
//!
//! The planner asks a resolver where a resource lives on each partition.
//! Resolution is a pure lookup with no side effects.

use std::collections::HashMap;
use std::sync::Arc;

use types::ids::{Address, PartitionId, ResourceId};

use crate::config::FeedConfig;

/// Maps a (resource, partition) pair to the resource's contract address.
pub trait AddressResolver: Send + Sync {
    /// `None` when the resource does not exist on the partition.
    fn resolve(&self, resource: &ResourceId, partition: PartitionId) -> Option<Address>;
}

impl<T: AddressResolver + ?Sized> AddressResolver for Arc<T> {
    fn resolve(&self, resource: &ResourceId, partition: PartitionId) -> Option<Address> {
        (**self).resolve(resource, partition)
    }
}

/// Resolver backed by a fixed in-memory table.
///
/// A zero address in the table is treated as "not deployed".
#[derive(Debug, Clone, Default)]
pub struct StaticAddressBook {
    entries: HashMap<(ResourceId, PartitionId), Address>,
}

impl StaticAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        let mut book = Self::new();
        for resource in &config.resources {
            for (partition, address) in &resource.addresses {
                book.insert(resource.id.clone(), *partition, *address);
            }
        }
        book
    }

    pub fn insert(&mut self, resource: ResourceId, partition: PartitionId, address: Address) {
        self.entries.insert((resource, partition), address);
    }

    pub fn with(mut self, resource: &str, partition: PartitionId, address: Address) -> Self {
        self.insert(ResourceId::new(resource), partition, address);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AddressResolver for StaticAddressBook {
    fn resolve(&self, resource: &ResourceId, partition: PartitionId) -> Option<Address> {
        self.entries
            .get(&(resource.clone(), partition))
            .copied()
            .filter(|address| !address.is_zero())
    }
}
