//! Types library for the cross-partition vault feed
//!
//! This library provides the core type definitions shared by the feed
//! services, so that planner, transport and consumers agree on one
//! vocabulary for identifiers, quantities, queries and published records.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Identifiers (ResourceId, PartitionId, Address, AccountId, SubscriptionId)
//! - `numeric`: On-chain quantities (ScaledAmount) and APR
//! - `query`: Query descriptors and raw per-query results
//! - `record`: Aggregated records and the published set
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod query;
pub mod record;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::query::*;
    pub use crate::record::*;
    pub use crate::errors::*;
}
