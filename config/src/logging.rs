//! Tracing subscriber setup.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::LoggingConfig;

const FALLBACK_FILTER: &str = "warn";

/// Filter precedence: `RUST_LOG`, then the configured filter, then `warn`.
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match config.filter.as_deref() {
            Some(directive) => EnvFilter::try_new(directive),
            None => EnvFilter::try_new(FALLBACK_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Install the global subscriber.
///
/// Only the first call takes effect; later calls return the error from
/// `try_init` instead of panicking.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(build_filter(config))
        .try_init()
}
