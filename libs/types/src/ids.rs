//! Identifier types for feed entities
//!
//! Resources and partitions are opaque to the engine: a resource is a logical
//! asset tracked across partitions, a partition is one independent data
//! domain (a chain). Subscription identifiers use UUID v7 so that log lines
//! from successive subscriptions sort chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Logical resource identifier, stable across partitions.
///
/// Example: `"USDC"` for a vault tracked on several chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new ResourceId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Partition identifier (chain id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u64);

impl PartitionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),

    #[error("address is not valid hex: {0}")]
    InvalidHex(String),
}

/// A 20-byte contract or account address on some partition.
///
/// Serialized as a `0x`-prefixed lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
        let array: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Account whose balance is queried on the home partition.
///
/// When no wallet is bound the planner uses [`AccountId::UNBOUND`], the zero
/// address, so that the query layout stays identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Address);

impl AccountId {
    pub const UNBOUND: AccountId = AccountId(Address::ZERO);

    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    pub fn is_unbound(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one transport subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new SubscriptionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_id_creation() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        assert_ne!(id1, id2, "SubscriptionIds should be unique");
    }

    #[test]
    fn test_resource_id_ordering() {
        let mut ids = vec![ResourceId::new("WETH"), ResourceId::new("DAI"), ResourceId::new("USDC")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "DAI");
        assert_eq!(ids[2].as_str(), "WETH");
    }

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "0x00000000000000000000000000000000000000aB".parse().unwrap();
        assert_eq!(addr.as_bytes()[19], 0xab);
        assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ab");
    }

    #[test]
    fn test_address_parse_without_prefix() {
        let addr: Address = "0000000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(addr.as_bytes()[19], 1);
    }

    #[test]
    fn test_address_invalid_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(err, AddressParseError::InvalidLength(2));
    }

    #[test]
    fn test_address_invalid_hex() {
        let err = "0xzz00000000000000000000000000000000000000".parse::<Address>().unwrap_err();
        assert!(matches!(err, AddressParseError::InvalidHex(_)));
    }

    #[test]
    fn test_address_serialization() {
        let addr: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x1111111111111111111111111111111111111111\"");

        let deserialized: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, deserialized);
    }

    #[test]
    fn test_unbound_account_is_zero_address() {
        assert!(AccountId::UNBOUND.is_unbound());
        assert_eq!(AccountId::UNBOUND.address(), Address::ZERO);
    }

    #[test]
    fn test_partition_id_serialization() {
        let json = serde_json::to_string(&PartitionId::new(137)).unwrap();
        assert_eq!(json, "137");
    }
}
