//! Error types for the relay wire schema

use thiserror::Error;

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Error, Debug)]
pub enum SchemaError {
    /// Payload is not valid JSON for a relay message
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload decoded but a field violates the schema
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
