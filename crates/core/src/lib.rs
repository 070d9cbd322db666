//! # MarketPulse Core
//!
//! Consistency and resilience services - no infrastructure dependencies.
//!
//! This crate contains:
//! - The key-value store port
//! - Optimistic versioned record updates
//! - Guarded outbound fetching (gate, breaker, rate limiter, deadline)
//! - The tracked write path for job status and report delivery
//!
//! ## Architecture Principles
//! - Depends only on `marketpulse-common` and `marketpulse-domain`
//! - No network or storage code; adapters live in `marketpulse-infra`
//! - All external dependencies via traits

pub mod fetch;
pub mod ports;
pub mod records;
pub mod tracking;

// Re-export specific items to avoid ambiguity
pub use fetch::{GuardRegistry, GuardSet, GuardSnapshot, ResilientFetcher};
pub use ports::{KeyValueStore, PutOptions, StoreError};
pub use records::{OptimisticRecordStore, RecordStoreError, UpdateOutcome};
pub use tracking::{
    ConsistencyCheck, DeliveryTracker, JobStatusTracker, TrackedWrite, TrackedWriter, Visibility,
};
