//! On-chain quantity types
//!
//! Token quantities are raw 256-bit integers paired with the token's
//! decimals; no rescaling happens inside the feed. APR values come back from
//! the rate query already decoded and use rust_decimal for exact comparison.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use primitive_types::U256;

/// Annual percentage rate as reported by the vault.
pub type Apr = Decimal;

/// A raw integer amount together with the decimals needed to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaledAmount {
    pub amount: U256,
    pub decimals: u8,
}

impl ScaledAmount {
    pub fn new(amount: U256, decimals: u8) -> Self {
        Self { amount, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self {
            amount: U256::zero(),
            decimals,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Add a raw amount expressed in the same decimals.
    ///
    /// Saturates at `U256::MAX`.
    pub fn saturating_add(self, raw: U256) -> Self {
        Self {
            amount: self.amount.saturating_add(raw),
            decimals: self.decimals,
        }
    }
}
