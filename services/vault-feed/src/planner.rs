//! Query planner
//!
//! Turns the resource set, the home partition and the bound account into an
//! ordered list of query descriptors plus the decode schema that describes
//! how that flat list splits back into resources.
//!
//! Per resource available on home, the emitted order is fixed:
//!
//! ```text
//! symbol, decimals, total_assets, apr, balance_of(account)   <- home address
//! total_assets                                                <- each available foreign partition
//! ```
//!
//! The decoder relies on this order positionally; changing it is a protocol
//! change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::{AccountId, PartitionId, ResourceId};
use types::query::{Operation, QueryArg, QueryDescriptor};

use crate::resolver::AddressResolver;

/// Number of home-partition queries emitted for every planned resource.
pub const FIXED_QUERIES_PER_RESOURCE: usize = 5;

/// Decode schema for one planned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLayout {
    pub resource: ResourceId,
    /// Foreign partitions contributing a total, in emission order.
    pub foreign: Vec<PartitionId>,
}

impl ResourceLayout {
    /// Number of results this resource occupies in a tick.
    pub fn arity(&self) -> usize {
        FIXED_QUERIES_PER_RESOURCE + self.foreign.len()
    }
}

/// An ordered descriptor list together with its decode schema.
///
/// Equality covers the descriptors and the layout only. Home and account
/// already show up in the descriptors when anything is planned, so two empty
/// plans compare equal whatever their home.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    home: PartitionId,
    account: AccountId,
    descriptors: Vec<QueryDescriptor>,
    layout: Vec<ResourceLayout>,
}

impl PartialEq for QueryPlan {
    fn eq(&self, other: &Self) -> bool {
        self.descriptors == other.descriptors && self.layout == other.layout
    }
}

impl QueryPlan {
    pub fn home(&self) -> PartitionId {
        self.home
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn descriptors(&self) -> &[QueryDescriptor] {
        &self.descriptors
    }

    pub fn layout(&self) -> &[ResourceLayout] {
        &self.layout
    }

    /// Number of results a tick for this plan must carry.
    pub fn expected_results(&self) -> usize {
        self.descriptors.len()
    }

    pub fn resource_count(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Whether a subscription for `previous` must be replaced by one for `self`.
    pub fn differs_from(&self, previous: Option<&QueryPlan>) -> bool {
        previous.map_or(true, |prev| prev != self)
    }
}

/// Builds query plans from the configured partition set.
pub struct QueryPlanner<R> {
    resolver: R,
    /// Known partitions, in the order foreign totals are queried.
    partitions: Vec<PartitionId>,
}

impl<R: AddressResolver> QueryPlanner<R> {
    pub fn new(resolver: R, partitions: Vec<PartitionId>) -> Self {
        Self {
            resolver,
            partitions,
        }
    }

    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Build the plan for `resources` viewed from `home`.
    ///
    /// Resources not deployed on `home` are skipped entirely. Without a bound
    /// account the balance query targets [`AccountId::UNBOUND`].
    pub fn plan(
        &self,
        resources: &BTreeSet<ResourceId>,
        home: PartitionId,
        account: Option<AccountId>,
    ) -> QueryPlan {
        let account = account.unwrap_or(AccountId::UNBOUND);
        let mut descriptors = Vec::new();
        let mut layout = Vec::with_capacity(resources.len());

        for resource in resources {
            let Some(home_address) = self.resolver.resolve(resource, home) else {
                debug!(resource = %resource, partition = %home, "Resource not on home partition, skipping");
                continue;
            };

            for operation in [
                Operation::Symbol,
                Operation::Decimals,
                Operation::TotalAssets,
                Operation::Apr,
            ] {
                descriptors.push(QueryDescriptor::new(home, home_address, operation));
            }
            descriptors.push(
                QueryDescriptor::new(home, home_address, Operation::BalanceOf)
                    .with_arg(QueryArg::Account(account)),
            );

            let mut foreign = Vec::new();
            for &partition in self.partitions.iter().filter(|p| **p != home) {
                match self.resolver.resolve(resource, partition) {
                    Some(address) => {
                        descriptors.push(QueryDescriptor::new(
                            partition,
                            address,
                            Operation::TotalAssets,
                        ));
                        foreign.push(partition);
                    }
                    None => {
                        debug!(resource = %resource, partition = %partition, "Resource not on foreign partition");
                    }
                }
            }

            layout.push(ResourceLayout {
                resource: resource.clone(),
                foreign,
            });
        }

        QueryPlan {
            home,
            account,
            descriptors,
            layout,
        }
    }
}


// ── Property-Based Tests ────────────────────────────────────────────

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::resolver::StaticAddressBook;
    use proptest::prelude::*;
    use types::ids::Address;

    proptest! {
        #[test]
        fn prop_layout_arity_covers_descriptors(
            availability in proptest::collection::vec(proptest::collection::vec(any::<bool>(), 4), 0..12),
            home_index in 0usize..4,
        ) {
            let partitions: Vec<PartitionId> = (1..=4).map(PartitionId::new).collect();
            let mut book = StaticAddressBook::new();
            let mut resources = BTreeSet::new();
            for (i, row) in availability.iter().enumerate() {
                let id = ResourceId::new(format!("R{:02}", i));
                for (j, available) in row.iter().enumerate() {
                    if *available {
                        book.insert(id.clone(), partitions[j], Address::from_bytes([(i * 4 + j + 1) as u8; 20]));
                    }
                }
                resources.insert(id);
            }

            let home = partitions[home_index];
            let plan = QueryPlanner::new(book, partitions.clone()).plan(&resources, home, None);

            let total: usize = plan.layout().iter().map(|l| l.arity()).sum();
            prop_assert_eq!(total, plan.expected_results());

            let mut cursor = 0;
            for layout in plan.layout() {
                let slice = &plan.descriptors()[cursor..cursor + layout.arity()];
                prop_assert!(slice[..FIXED_QUERIES_PER_RESOURCE].iter().all(|d| d.partition == home));
                for (d, partition) in slice[FIXED_QUERIES_PER_RESOURCE..].iter().zip(&layout.foreign) {
                    prop_assert_eq!(d.partition, *partition);
                    prop_assert_eq!(d.operation, Operation::TotalAssets);
                }
                cursor += layout.arity();
            }
        }
    }
}
