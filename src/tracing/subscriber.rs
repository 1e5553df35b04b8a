//! Subscriber setup with layered architecture
//!
//! ```text
//! Registry
//!   ├── EnvFilter (--log-level, then RUST_LOG, then logging.level)
//!   └── Fmt Layer (text or JSON, written to stderr)
//! ```
//!
//! Output goes to stderr so command output on stdout stays machine-readable.

use super::TracingError;
use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Resolve the log filter.
///
/// An explicit override wins, then `RUST_LOG`, then the configured level.
pub fn build_filter(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<EnvFilter, TracingError> {
    let directive = match level_override {
        Some(level) => level.to_string(),
        None => match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(value) if !value.trim().is_empty() => value,
            _ => config.level.clone(),
        },
    };

    EnvFilter::try_new(&directive).map_err(|e| TracingError::InvalidFilter {
        filter: directive.clone(),
        message: e.to_string(),
    })
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_subscriber(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<(), TracingError> {
    let env_filter = build_filter(config, level_override)?;

    let fmt_layer = if config.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TracingError::AlreadyInitialized(e.to_string()))
}
