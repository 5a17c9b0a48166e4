//! Wire schema for messages relayed between the producer and consumer accounts
//!
//! A [`RelayMessage`] is serialized as a camelCase JSON object and published
//! with its `messageId` as the Kafka key, so every partition-level duplicate
//! carries the same identity the consumer deduplicates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod error;
pub mod identity;
mod outcome;

pub use error::{SchemaError, SchemaResult};
pub use identity::MessageIdentity;
pub use outcome::SendOutcome;

/// Message type used when a request does not name one
pub const DEFAULT_MESSAGE_TYPE: &str = "connectivity-test";

/// Longest message id accepted on either side of the relay
pub const MAX_MESSAGE_ID_LEN: usize = 255;

/// Longest account, message type or batch id the consumer can store
pub const MAX_TEXT_FIELD_LEN: usize = 255;

/// One business message in flight between accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub message_id: String,
    /// Creation time on the producer side
    pub timestamp: DateTime<Utc>,
    pub source_account: Option<String>,
    pub target_account: Option<String>,
    pub payload: String,
    pub message_type: String,
    pub batch_id: String,
    /// 1-based position within the batch
    pub sequence_number: u32,
}

impl RelayMessage {
    /// Decode a broker payload and check the fields the consumer relies on
    pub fn from_slice(bytes: &[u8]) -> SchemaResult<Self> {
        let message: RelayMessage = serde_json::from_slice(bytes)?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_bytes(&self) -> SchemaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn validate(&self) -> SchemaResult<()> {
        validate_message_id(&self.message_id)?;
        if let Some(account) = &self.source_account {
            validate_text_field("sourceAccount", account)?;
        }
        if let Some(account) = &self.target_account {
            validate_text_field("targetAccount", account)?;
        }
        validate_text_field("messageType", &self.message_type)?;
        validate_text_field("batchId", &self.batch_id)?;
        if self.payload.contains('\0') {
            return Err(SchemaError::InvalidField {
                field: "payload",
                reason: "contains a NUL character".to_string(),
            });
        }
        if self.sequence_number == 0 {
            return Err(SchemaError::InvalidField {
                field: "sequenceNumber",
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Flattened view stored alongside each consumption record
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "messageId": self.message_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "sourceAccount": self.source_account,
            "targetAccount": self.target_account,
            "payload": self.payload,
            "messageType": self.message_type,
            "batchId": self.batch_id,
            "sequenceNumber": self.sequence_number,
        })
    }
}

/// Non-empty and at most [`MAX_MESSAGE_ID_LEN`] bytes
pub fn validate_message_id(message_id: &str) -> SchemaResult<()> {
    if message_id.trim().is_empty() {
        return Err(SchemaError::InvalidField {
            field: "messageId",
            reason: "cannot be empty".to_string(),
        });
    }
    if message_id.contains('\0') {
        return Err(SchemaError::InvalidField {
            field: "messageId",
            reason: "contains a NUL character".to_string(),
        });
    }
    if message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(SchemaError::InvalidField {
            field: "messageId",
            reason: format!(
                "too long: {} characters (max {})",
                message_id.len(),
                MAX_MESSAGE_ID_LEN
            ),
        });
    }
    Ok(())
}

/// At most [`MAX_TEXT_FIELD_LEN`] characters and free of NUL
fn validate_text_field(field: &'static str, value: &str) -> SchemaResult<()> {
    if value.contains('\0') {
        return Err(SchemaError::InvalidField {
            field,
            reason: "contains a NUL character".to_string(),
        });
    }
    let chars = value.chars().count();
    if chars > MAX_TEXT_FIELD_LEN {
        return Err(SchemaError::InvalidField {
            field,
            reason: format!("too long: {} characters (max {})", chars, MAX_TEXT_FIELD_LEN),
        });
    }
    Ok(())
}
