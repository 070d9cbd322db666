mod conversions;

pub use conversions::{HttpError, InfraError};
