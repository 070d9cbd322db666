//! Tracked write path
//!
//! Status writes go through [`OptimisticRecordStore`](crate::records::OptimisticRecordStore)
//! and, when the effect must be observable, a consistency wait.

pub mod service;
pub mod writer;

pub use service::{DeliveryTracker, JobStatusTracker};
pub use writer::{ConsistencyCheck, TrackedWrite, TrackedWriter, Visibility};
