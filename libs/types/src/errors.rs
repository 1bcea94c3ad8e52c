//! Error types for the vault feed
//!
//! Comprehensive error taxonomy using thiserror. Per-resource incompleteness
//! (a missing APR, a resource absent on a partition) is not represented here:
//! it drops the resource from the tick and is never an error.

use thiserror::Error;

use crate::ids::PartitionId;

/// Top-level feed error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed runtime stopped")]
    Stopped,
}

/// Errors that make a whole tick undecodable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Result length mismatch: expected {expected} results, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Batched-read transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Subscribe failed: {reason}")]
    SubscribeFailed { reason: String },

    #[error("Batch execution failed at block {block}: {reason}")]
    ExecutionFailed { block: u64, reason: String },

    #[error("Tick channel closed")]
    ChannelClosed,
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("No partitions configured")]
    NoPartitions,

    #[error("Duplicate partition: {0}")]
    DuplicatePartition(PartitionId),

    #[error("Home partition {0} is not a known partition")]
    UnknownHome(PartitionId),

    #[error("Resource {resource} has an address on unknown partition {partition}")]
    UnknownResourcePartition { resource: String, partition: PartitionId },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}
