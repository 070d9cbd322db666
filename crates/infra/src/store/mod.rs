//! Key-value store adapters

pub mod memory;

pub use memory::EventuallyConsistentStore;
