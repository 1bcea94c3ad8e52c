//! Change detection
//!
//! A candidate record set only moves downstream when it differs from the
//! latest accepted set. Comparison is a deep, order-sensitive equality over
//! the records. While nothing has been published yet (`loading`), every
//! successful candidate counts as a change so that the first tick, even an
//! empty one, clears the loading flag.

use types::record::{AggregatedRecord, PublishedSet};

/// Whether `candidate` must be offered for publication.
pub fn changed(previous: &PublishedSet, candidate: &[AggregatedRecord]) -> bool {
    previous.loading || previous.records.as_slice() != candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use types::ids::ResourceId;
    use types::numeric::{ScaledAmount, U256};

    fn record(symbol: &str, tvl: u64) -> AggregatedRecord {
        AggregatedRecord {
            resource_id: ResourceId::new(symbol),
            decimals: 6,
            apr: Decimal::from_str_exact("2.5").unwrap(),
            total_value_locked: ScaledAmount::new(U256::from(tvl), 6),
            invested_amount: ScaledAmount::zero(6),
        }
    }

    fn published(records: Vec<AggregatedRecord>) -> PublishedSet {
        PublishedSet {
            records: Arc::new(records),
            loading: false,
            revision: 1,
        }
    }

    #[test]
    fn test_identical_set_is_unchanged() {
        let previous = published(vec![record("DAI", 10), record("USDC", 20)]);
        assert!(!changed(&previous, &[record("DAI", 10), record("USDC", 20)]));
    }

    #[test]
    fn test_value_change_detected() {
        let previous = published(vec![record("DAI", 10)]);
        assert!(changed(&previous, &[record("DAI", 11)]));
    }

    #[test]
    fn test_order_is_significant() {
        let previous = published(vec![record("DAI", 10), record("USDC", 20)]);
        assert!(changed(&previous, &[record("USDC", 20), record("DAI", 10)]));
    }

    #[test]
    fn test_loading_set_always_changes() {
        assert!(changed(&PublishedSet::initial(), &[]));
    }

    #[test]
    fn test_removed_record_detected() {
        let previous = published(vec![record("DAI", 10), record("USDC", 20)]);
        assert!(changed(&previous, &[record("DAI", 10)]));
    }
}
