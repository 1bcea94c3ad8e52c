//! Query descriptors and raw results
//!
//! A query descriptor names one read against one contract on one partition.
//! The batched-read transport returns exactly one [`RawResult`] per
//! descriptor, in descriptor order; that positional alignment is the only
//! link between a result and the query that produced it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{AccountId, Address, PartitionId};
use crate::numeric::U256;

/// Read operation issued against a vault contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Token symbol (text)
    Symbol,
    /// Token decimals (uint)
    Decimals,
    /// Total quantity outstanding on this partition (uint)
    TotalAssets,
    /// Current rate / APR (decimal)
    Apr,
    /// Balance of an account (uint), takes [`QueryArg::Account`]
    BalanceOf,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Symbol => "symbol",
            Operation::Decimals => "decimals",
            Operation::TotalAssets => "total_assets",
            Operation::Apr => "apr",
            Operation::BalanceOf => "balance_of",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Argument attached to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryArg {
    Account(AccountId),
}

/// One read in a batched query plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub partition: PartitionId,
    pub address: Address,
    pub operation: Operation,
    pub args: Option<QueryArg>,
}

impl QueryDescriptor {
    pub fn new(partition: PartitionId, address: Address, operation: Operation) -> Self {
        Self {
            partition,
            address,
            operation,
            args: None,
        }
    }

    pub fn with_arg(mut self, arg: QueryArg) -> Self {
        self.args = Some(arg);
        self
    }
}

/// A successfully decoded query return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryValue {
    Text(String),
    Uint(U256),
    Rate(Decimal),
}

/// Outcome of one query within a tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RawResult {
    Value { value: QueryValue },
    /// The call returned nothing (e.g. contract missing at that block).
    Absent,
    /// The call reverted or could not be decoded.
    Failed { reason: String },
}

impl RawResult {
    pub fn value(value: QueryValue) -> Self {
        RawResult::Value { value }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::value(QueryValue::Text(s.into()))
    }

    pub fn uint(v: impl Into<U256>) -> Self {
        Self::value(QueryValue::Uint(v.into()))
    }

    pub fn rate(d: Decimal) -> Self {
        Self::value(QueryValue::Rate(d))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        RawResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, RawResult::Value { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawResult::Value {
                value: QueryValue::Text(s),
            } => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            RawResult::Value {
                value: QueryValue::Uint(v),
            } => Some(*v),
            _ => None,
        }
    }

    /// Decimals are returned as a uint but must fit in a `u8`.
    pub fn as_decimals(&self) -> Option<u8> {
        self.as_uint()
            .filter(|v| *v <= U256::from(u8::MAX))
            .map(|v| v.low_u32() as u8)
    }

    pub fn as_rate(&self) -> Option<Decimal> {
        match self {
            RawResult::Value {
                value: QueryValue::Rate(d),
            } => Some(*d),
            _ => None,
        }
    }
}
