//! Environment-driven configuration shared by the relay services
//!
//! Every service reads its settings from environment variables (optionally
//! seeded from a local `.env` file), validates them once at startup and keeps
//! them immutable afterwards. A value that is present but malformed is a
//! startup error; it is never silently replaced by the default.

use std::str::FromStr;
use thiserror::Error;

pub mod aws;
pub mod database;
pub mod http;
pub mod kafka;

pub use aws::CrossAccountConfig;
pub use database::DatabaseConfig;
pub use http::HttpServerConfig;
pub use kafka::{KafkaConfig, SecurityProtocol};

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal configuration problems detected at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set (or is blank)
    #[error("Missing configuration: {0}")]
    Missing(String),

    /// A variable is set but its value is unusable
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

impl ConfigError {
    pub fn invalid(var: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

/// Load `.env` from the working directory if one exists
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded environment from .env");
    }
}

/// Read a variable, treating blank values as unset
pub fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable that must be present
pub fn env_required(key: &str) -> ConfigResult<String> {
    env_optional(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Parse a variable, falling back to `default` only when it is unset
///
/// # Example
/// ```ignore
/// let port: u16 = env_or("HTTP_PORT", 8080)?;
/// ```
pub fn env_or<T: FromStr>(key: &str, default: T) -> ConfigResult<T> {
    match env_optional(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Parse a variable that may be absent
pub fn env_parse_optional<T: FromStr>(key: &str) -> ConfigResult<Option<T>> {
    env_optional(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw)))
}
