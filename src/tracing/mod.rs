//! Log output setup
//!
//! The crate logs through `tracing` macros and `#[tracing::instrument]` spans.
//! This module installs the process-wide subscriber that renders them.
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::config::LoggingConfig;
//! use kumo_uploadr::tracing::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggingConfig {
//!     level: "debug".to_string(),
//!     format: "json".to_string(),
//! };
//!
//! init_subscriber(&config, None)?;
//! # Ok(())
//! # }
//! ```

pub mod subscriber;

pub use subscriber::{build_filter, init_subscriber};

use thiserror::Error;

/// Errors that can occur during subscriber setup
#[derive(Error, Debug)]
pub enum TracingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to install subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}
