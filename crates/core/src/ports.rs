//! Port interfaces for the key-value store
//!
//! The store is eventually consistent: a successful `put` may not be visible
//! to `get` until a bounded delay has passed. It offers no compare-and-swap.

use std::time::Duration;

use async_trait::async_trait;
use marketpulse_common::error::{ErrorClassification, ErrorSeverity};
use marketpulse_domain::MarketPulseError;
use serde_json::Value;
use thiserror::Error;

/// Per-write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Expire the value after this long
    pub ttl: Option<Duration>,
}

impl PutOptions {
    pub const fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Failures reported by a store adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached; retrying may help
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request
    #[error("store backend error: {0}")]
    Backend(String),
}

impl ErrorClassification for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unavailable(_) => ErrorSeverity::Warning,
            Self::Backend(_) => ErrorSeverity::Error,
        }
    }
}

impl From<StoreError> for MarketPulseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::Unavailable(message),
            StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

/// Key-value store holding JSON documents
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value visible under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` under `key`
    async fn put(&self, key: &str, value: Value, options: PutOptions) -> Result<(), StoreError>;

    /// Remove `key`; returns whether a value was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
