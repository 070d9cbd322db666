//! Resilient outbound fetching
//!
//! [`GuardRegistry`] owns one [`GuardSet`] per upstream resource and
//! [`ResilientFetcher`] runs calls through it.

mod fetcher;
mod registry;

pub use fetcher::ResilientFetcher;
pub use registry::{GuardRegistry, GuardSet, GuardSnapshot};
