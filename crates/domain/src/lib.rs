//! # MarketPulse Domain
//!
//! Business domain types for MarketPulse.
//!
//! This crate contains:
//! - Tracked record types (job status, report delivery) and the
//!   `VersionedRecord` contract used for optimistic updates
//! - Domain error types and Result definitions
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other MarketPulse crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod records;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use records::*;
