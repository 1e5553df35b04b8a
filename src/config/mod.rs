//! Configuration module for Kumo Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation of every upload tunable.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

use crate::upload::RetryPolicy;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR_PATTERN: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
            .expect("env var pattern is valid");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("KUMO_TOKEN", "abc");
/// assert_eq!(expand_env_vars("Bearer ${KUMO_TOKEN}"), "Bearer abc");
/// assert_eq!(expand_env_vars("${MISSING:-fallback}"), "fallback");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Configuration with defaults for everything except the backend URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                base_url: base_url.into(),
                timeouts: TimeoutConfig::default(),
            },
            auth: AuthConfig::default(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.server.base_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid base_url '{}': must start with http:// or https://",
                self.server.base_url
            )));
        }

        let timeouts = &self.server.timeouts;
        for (name, value) in [
            ("default_ms", timeouts.default_ms),
            ("single_upload_ms", timeouts.single_upload_ms),
            ("chunk_upload_ms", timeouts.chunk_upload_ms),
            ("merge_ms", timeouts.merge_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Timeout '{}' must be greater than zero",
                    name
                )));
            }
        }

        let upload = &self.upload;
        if upload.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if upload.chunk_concurrency == 0 || upload.file_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_concurrency and file_concurrency must be at least 1".into(),
            ));
        }
        if upload.max_chunk_retries == 0 || upload.max_file_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_chunk_retries and max_file_retries must be at least 1".into(),
            ));
        }

        if upload.progress_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "progress_tick_ms must be greater than zero".into(),
            ));
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'text' or 'json'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Backend server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API root, e.g. `https://img.example.com/api`
    pub base_url: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Per-call transport timeouts.
///
/// Bulk byte transfers get longer budgets than control calls so that large
/// payloads survive slow links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_ms: u64,
    #[serde(default = "default_single_upload_timeout_ms")]
    pub single_upload_ms: u64,
    #[serde(default = "default_chunk_upload_timeout_ms")]
    pub chunk_upload_ms: u64,
    #[serde(default = "default_merge_timeout_ms")]
    pub merge_ms: u64,
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    pub fn single_upload(&self) -> Duration {
        Duration::from_millis(self.single_upload_ms)
    }

    pub fn chunk_upload(&self) -> Duration {
        Duration::from_millis(self.chunk_upload_ms)
    }

    pub fn merge(&self) -> Duration {
        Duration::from_millis(self.merge_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_timeout_ms(),
            single_upload_ms: default_single_upload_timeout_ms(),
            chunk_upload_ms: default_chunk_upload_timeout_ms(),
            merge_ms: default_merge_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_single_upload_timeout_ms() -> u64 {
    120_000
}

fn default_chunk_upload_timeout_ms() -> u64 {
    60_000
}

fn default_merge_timeout_ms() -> u64 {
    180_000
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token (login session token or API token)
    #[serde(default)]
    pub token: Option<String>,
}

/// Upload engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files strictly larger than this many bytes use the chunked path
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    /// Requested chunk size; the server may negotiate a different one
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    #[serde(default = "default_max_file_retries")]
    pub max_file_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_chunk_backoff_cap_ms")]
    pub chunk_backoff_cap_ms: u64,
    #[serde(default = "default_file_backoff_cap_ms")]
    pub file_backoff_cap_ms: u64,
    /// Interval of simulated progress ticks on the single-shot path
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
}

impl UploadConfig {
    pub fn chunk_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_chunk_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.chunk_backoff_cap_ms),
        )
    }

    pub fn file_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_file_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.file_backoff_cap_ms),
        )
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            chunk_concurrency: default_chunk_concurrency(),
            file_concurrency: default_file_concurrency(),
            max_chunk_retries: default_max_chunk_retries(),
            max_file_retries: default_max_file_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            chunk_backoff_cap_ms: default_chunk_backoff_cap_ms(),
            file_backoff_cap_ms: default_file_backoff_cap_ms(),
            progress_tick_ms: default_progress_tick_ms(),
        }
    }
}

fn default_chunk_threshold() -> u64 {
    2 * 1024 * 1024 // 2MB
}

fn default_chunk_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_chunk_concurrency() -> usize {
    5
}

fn default_file_concurrency() -> usize {
    3
}

fn default_max_chunk_retries() -> u32 {
    3
}

fn default_max_file_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_chunk_backoff_cap_ms() -> u64 {
    5000
}

fn default_file_backoff_cap_ms() -> u64 {
    3000
}

fn default_progress_tick_ms() -> u64 {
    500
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
