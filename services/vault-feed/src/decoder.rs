//! Response decoder and cross-partition aggregator
//!
//! Walks a tick's flat result list with a cursor, using the plan's layout as
//! the schema: five fixed home results per resource, then one foreign total
//! per partition recorded in the layout. Every resource consumes exactly its
//! arity whether or not it yields a record, so a missing field on one
//! resource can never shift the results of the next.

use rust_decimal::Decimal;
use tracing::debug;
use types::errors::DecodeError;
use types::ids::ResourceId;
use types::numeric::{ScaledAmount, U256};
use types::query::RawResult;
use types::record::AggregatedRecord;

use crate::config::{FeedConfig, ValidityPolicy};
use crate::planner::QueryPlan;

/// Strips partition-encoding prefixes from decoded symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolNormalizer {
    prefixes: Vec<String>,
}

impl SymbolNormalizer {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// Remove the first configured prefix that leaves a non-empty symbol.
    pub fn normalize<'a>(&self, symbol: &'a str) -> &'a str {
        self.prefixes
            .iter()
            .filter_map(|prefix| symbol.strip_prefix(prefix.as_str()))
            .find(|rest| !rest.is_empty())
            .unwrap_or(symbol)
    }
}

/// Decode settings derived from config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodePolicy {
    pub validity: ValidityPolicy,
    pub normalizer: SymbolNormalizer,
}

impl DecodePolicy {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            validity: config.validity,
            normalizer: SymbolNormalizer::new(config.symbol_prefixes.clone()),
        }
    }
}

/// Records decoded from one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTick {
    pub records: Vec<AggregatedRecord>,
    /// Planned resources left out because a critical field was missing.
    pub dropped: Vec<ResourceId>,
}

static ABSENT: RawResult = RawResult::Absent;

/// Forward-only cursor over a tick's results.
struct ResultCursor<'a> {
    results: &'a [RawResult],
    position: usize,
}

/// The fixed home-partition slots for one resource.
struct FixedSlots<'a> {
    symbol: &'a RawResult,
    decimals: &'a RawResult,
    total: &'a RawResult,
    apr: &'a RawResult,
    balance: &'a RawResult,
}

impl<'a> ResultCursor<'a> {
    fn new(results: &'a [RawResult]) -> Self {
        Self {
            results,
            position: 0,
        }
    }

    fn next(&mut self) -> &'a RawResult {
        let result = self.results.get(self.position).unwrap_or(&ABSENT);
        self.position += 1;
        result
    }

    fn take_fixed(&mut self) -> FixedSlots<'a> {
        FixedSlots {
            symbol: self.next(),
            decimals: self.next(),
            total: self.next(),
            apr: self.next(),
            balance: self.next(),
        }
    }

    fn skip(&mut self, count: usize) {
        self.position += count;
    }

    fn consumed(&self) -> usize {
        self.position
    }
}

struct CriticalFields<'a> {
    symbol: &'a str,
    decimals: u8,
    total: U256,
    apr: Decimal,
    balance: U256,
}

fn critical_fields<'a>(slots: &FixedSlots<'a>, validity: ValidityPolicy) -> Option<CriticalFields<'a>> {
    let fields = CriticalFields {
        symbol: slots.symbol.as_text().filter(|s| !s.is_empty())?,
        decimals: slots.decimals.as_decimals()?,
        total: slots.total.as_uint()?,
        apr: slots.apr.as_rate()?,
        balance: slots.balance.as_uint()?,
    };

    match validity {
        ValidityPolicy::Present => Some(fields),
        ValidityPolicy::Truthy => {
            let truthy = fields.decimals != 0
                && !fields.total.is_zero()
                && !fields.apr.is_zero()
                && !fields.balance.is_zero();
            truthy.then_some(fields)
        }
    }
}

/// Decode one tick's results against the plan that produced them.
///
/// An empty result list decodes to an empty set ("no data yet"). Any other
/// length that differs from the plan is fatal for the tick.
pub fn decode(
    results: &[RawResult],
    plan: &QueryPlan,
    policy: &DecodePolicy,
) -> Result<DecodedTick, DecodeError> {
    if results.is_empty() {
        return Ok(DecodedTick {
            records: Vec::new(),
            dropped: Vec::new(),
        });
    }

    if results.len() != plan.expected_results() {
        return Err(DecodeError::LengthMismatch {
            expected: plan.expected_results(),
            actual: results.len(),
        });
    }

    let mut cursor = ResultCursor::new(results);
    let mut records = Vec::with_capacity(plan.resource_count());
    let mut dropped = Vec::new();

    for layout in plan.layout() {
        let slots = cursor.take_fixed();

        let Some(fields) = critical_fields(&slots, policy.validity) else {
            debug!(resource = %layout.resource, "Incomplete critical fields, dropping resource");
            cursor.skip(layout.foreign.len());
            dropped.push(layout.resource.clone());
            continue;
        };

        let mut total_value_locked = ScaledAmount::new(fields.total, fields.decimals);
        for partition in &layout.foreign {
            match cursor.next().as_uint() {
                Some(foreign_total) => {
                    total_value_locked = total_value_locked.saturating_add(foreign_total);
                }
                None => {
                    debug!(resource = %layout.resource, partition = %partition, "Foreign total unavailable");
                }
            }
        }

        records.push(AggregatedRecord {
            resource_id: ResourceId::new(policy.normalizer.normalize(fields.symbol)),
            decimals: fields.decimals,
            apr: fields.apr,
            total_value_locked,
            invested_amount: ScaledAmount::new(fields.balance, fields.decimals),
        });
    }

    debug_assert_eq!(
        cursor.consumed(),
        results.len(),
        "layout arity must cover the result list"
    );

    Ok(DecodedTick { records, dropped })
}
