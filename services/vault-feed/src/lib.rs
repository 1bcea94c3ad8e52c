//! Vault Feed Service
//!
//! Reads vault state across partitions in one batched query per block and
//! publishes an aggregated record set to consumers:
//! - Query planning from (resources, home partition, account)
//! - Subscription management with stale-tick filtering
//! - Positional decoding with cross-partition total aggregation
//! - Change detection so unchanged ticks never touch the store
//! - Deferred publication while a consumer interaction is active
//!
//! # Architecture
//!
//! ```text
//!  resources / home / account
//!        │
//!    ┌───▼────┐
//!    │Planner │  ← resolver: (resource, partition) → address
//!    └───┬────┘
//!        │ QueryPlan
//!  ┌─────▼──────┐      ┌───────────┐
//!  │Subscription├─────►│ Transport │  one batch per block
//!  └─────▲──────┘      └─────┬─────┘
//!        │ is_current         │ TickEnvelope (bounded queue)
//!    ┌───┴────┐◄──────────────┘
//!    │Decoder │
//!    └───┬────┘
//!    ┌───▼─────┐
//!    │Detector │  ← skip unchanged
//!    └───┬─────┘
//!    ┌───▼─────┐
//!    │  Gate   │  ← Idle: publish │ Interaction: pending slot
//!    └───┬─────┘
//!    ┌───▼─────┐
//!    │  Store  │  → StoreReader (watch)
//!    └─────────┘
//! ```

pub mod config;
pub mod decoder;
pub mod detector;
pub mod engine;
pub mod gate;
pub mod metrics;
pub mod planner;
pub mod resolver;
pub mod runtime;
pub mod simulated;
pub mod store;
pub mod transport;

pub use config::{FeedConfig, ValidityPolicy};
pub use engine::{FeedEngine, TickOutcome};
pub use runtime::{FeedHandle, FeedRuntime};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
