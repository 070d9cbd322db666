//! Logging bootstrap
//!
//! `RUST_LOG` overrides the configured level when it is set.

use marketpulse_domain::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed, so calling this
/// more than once is harmless.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed =
        if config.json { builder.json().try_init() } else { builder.try_init() };
    installed.is_ok()
}
