//! # MarketPulse Infrastructure
//!
//! Adapters behind the ports defined in `marketpulse-core`.
//!
//! This crate contains:
//! - Configuration loading (environment and TOML/JSON files)
//! - The in-memory eventually consistent key-value store
//! - The guarded HTTP client for the market and news APIs
//! - Logging bootstrap
//!
//! ## Architecture
//! - Implements traits defined in `marketpulse-core`
//! - Depends on `marketpulse-domain` and `marketpulse-common`
//! - Contains all "impure" code (I/O, clocks, network)

pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod store;

// Re-export commonly used items
pub use errors::{HttpError, InfraError};
pub use http::{HttpMarketClient, HttpMarketClientBuilder};
pub use observability::init_tracing;
pub use store::EventuallyConsistentStore;
