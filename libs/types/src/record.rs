//! Aggregated records and the published set
//!
//! An [`AggregatedRecord`] is the per-tick view of one resource with its
//! cross-partition total folded in. The [`PublishedSet`] is what consumers
//! read; it is replaced wholesale on every publish and never edited in place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::ResourceId;
use crate::numeric::{Apr, ScaledAmount};

/// One resource after decode and cross-partition aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregatedRecord {
    /// Canonical resource name (symbol with any partition prefix stripped).
    pub resource_id: ResourceId,
    pub decimals: u8,
    pub apr: Apr,
    /// Home total plus every available foreign total.
    pub total_value_locked: ScaledAmount,
    /// Bound account's balance on the home partition.
    pub invested_amount: ScaledAmount,
}

/// Snapshot of the published record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSet {
    pub records: Arc<Vec<AggregatedRecord>>,
    /// True until the first successful publish.
    pub loading: bool,
    /// Incremented on every replacement of the set; 0 before the first one.
    pub revision: u64,
}

impl PublishedSet {
    /// The state before any tick has been published.
    pub fn initial() -> Self {
        Self {
            records: Arc::new(Vec::new()),
            loading: true,
            revision: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, resource_id: &ResourceId) -> Option<&AggregatedRecord> {
        self.records.iter().find(|r| &r.resource_id == resource_id)
    }
}

impl Default for PublishedSet {
    fn default() -> Self {
        Self::initial()
    }
}
