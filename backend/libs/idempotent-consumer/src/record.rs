//! Consumption records and the delivery metadata they are built from

use chrono::{DateTime, Utc};
use relay_schema::{RelayMessage, MAX_MESSAGE_ID_LEN, MAX_TEXT_FIELD_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest error text kept on a record
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Success,
    Failed,
    Dlq,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "SUCCESS",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::Dlq => "DLQ",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ProcessingStatus::Success),
            "FAILED" => Ok(ProcessingStatus::Failed),
            "DLQ" => Ok(ProcessingStatus::Dlq),
            other => Err(format!("unknown processing status '{}'", other)),
        }
    }
}

/// Where and when a message was received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub consumer_group: String,
    pub received_at: DateTime<Utc>,
    /// Broker key, the producer sets it to the message id
    pub key: Option<String>,
}

impl DeliveryContext {
    /// Identity for a delivery whose payload carries none. A topic name too
    /// long to fit is cut from the front so the coordinates survive.
    pub fn fallback_message_id(&self) -> String {
        let coordinates = format!("-{}-{}", self.partition, self.offset);
        let room = MAX_MESSAGE_ID_LEN.saturating_sub(coordinates.len());
        let topic = tail_within(&self.topic, room);
        format!("{}{}", topic, coordinates)
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds().max(0)
    }
}

/// Append-only audit row, one per consumption attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedRecord {
    /// Storage key, assigned on insert
    pub id: Option<i64>,
    pub message_id: String,
    pub original_timestamp: Option<DateTime<Utc>>,
    pub consumed_timestamp: DateTime<Utc>,
    pub source_account: Option<String>,
    pub target_account: Option<String>,
    pub message_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub batch_id: Option<String>,
    pub sequence_number: Option<i32>,
    pub processing_duration_ms: Option<i64>,
    pub partition: i32,
    pub offset: i64,
    pub consumer_group: String,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl ConsumedRecord {
    /// Record for a decoded message; `error` is kept only for non-success statuses
    pub fn from_message(
        message: &RelayMessage,
        ctx: &DeliveryContext,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Self {
        Self {
            id: None,
            message_id: message.message_id.clone(),
            original_timestamp: Some(message.timestamp),
            consumed_timestamp: Utc::now(),
            source_account: message.source_account.clone(),
            target_account: message.target_account.clone(),
            message_type: Some(message.message_type.clone()),
            payload: Some(message.snapshot()),
            batch_id: Some(message.batch_id.clone()),
            sequence_number: i32::try_from(message.sequence_number).ok(),
            processing_duration_ms: Some(ctx.elapsed_ms()),
            partition: ctx.partition,
            offset: ctx.offset,
            consumer_group: ctx.consumer_group.clone(),
            status,
            error_message: error.map(truncate_error),
            retry_count: 0,
        }
    }

    /// Copy that fits the storage bounds whatever the message carried: text
    /// cut to column width, NUL escaped, and the payload kept as escaped JSON
    /// text when it contains NUL
    pub fn storable(self) -> Self {
        let payload = self.payload.map(|payload| {
            if contains_nul(&payload) {
                serde_json::Value::String(payload.to_string())
            } else {
                payload
            }
        });

        Self {
            message_id: storable_text(&self.message_id, MAX_MESSAGE_ID_LEN),
            source_account: self
                .source_account
                .map(|v| storable_text(&v, MAX_TEXT_FIELD_LEN)),
            target_account: self
                .target_account
                .map(|v| storable_text(&v, MAX_TEXT_FIELD_LEN)),
            message_type: self
                .message_type
                .map(|v| storable_text(&v, MAX_TEXT_FIELD_LEN)),
            payload,
            batch_id: self.batch_id.map(|v| storable_text(&v, MAX_TEXT_FIELD_LEN)),
            consumer_group: storable_text(&self.consumer_group, MAX_TEXT_FIELD_LEN),
            error_message: self
                .error_message
                .map(|v| storable_text(&v, MAX_ERROR_MESSAGE_LEN)),
            ..self
        }
    }

    /// Record for a delivery that could not be decoded; the raw body is kept
    /// as a JSON string
    pub fn dead_letter(message_id: &str, raw: &str, reason: &str, ctx: &DeliveryContext) -> Self {
        Self {
            id: None,
            message_id: message_id.to_string(),
            original_timestamp: None,
            consumed_timestamp: Utc::now(),
            source_account: None,
            target_account: None,
            message_type: None,
            payload: Some(serde_json::Value::String(raw.replace('\0', "\\0"))),
            batch_id: None,
            sequence_number: None,
            processing_duration_ms: Some(ctx.elapsed_ms()),
            partition: ctx.partition,
            offset: ctx.offset,
            consumer_group: ctx.consumer_group.clone(),
            status: ProcessingStatus::Dlq,
            error_message: Some(truncate_error(reason)),
            retry_count: 0,
        }
        .storable()
    }
}

/// Cut to [`MAX_ERROR_MESSAGE_LEN`] characters on a char boundary
pub fn truncate_error(error: &str) -> String {
    truncate_chars(error, MAX_ERROR_MESSAGE_LEN).to_string()
}

fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Longest suffix of `value` that is at most `max_bytes` long
fn tail_within(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut start = value.len() - max_bytes;
    while !value.is_char_boundary(start) {
        start += 1;
    }
    &value[start..]
}

fn contains_nul(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains('\0'),
        serde_json::Value::Array(items) => items.iter().any(contains_nul),
        serde_json::Value::Object(map) => map
            .iter()
            .any(|(key, item)| key.contains('\0') || contains_nul(item)),
        _ => false,
    }
}

/// PostgreSQL text rejects NUL, so it is spelled out before cutting to width
fn storable_text(value: &str, max_chars: usize) -> String {
    if value.contains('\0') {
        truncate_chars(&value.replace('\0', "\\0"), max_chars).to_string()
    } else {
        truncate_chars(value, max_chars).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            topic: "cross-account-messages".to_string(),
            partition: 2,
            offset: 77,
            consumer_group: "relay-consumer".to_string(),
            received_at: Utc::now(),
            key: None,
        }
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            ProcessingStatus::Success,
            ProcessingStatus::Failed,
            ProcessingStatus::Dlq,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>(), Ok(status));
        }
        assert_eq!("dlq".parse::<ProcessingStatus>(), Ok(ProcessingStatus::Dlq));
        assert!("RETRY".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&ProcessingStatus::Dlq).unwrap();
        assert_eq!(json, "\"DLQ\"");
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "é".repeat(MAX_ERROR_MESSAGE_LEN + 10);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_fallback_message_id() {
        assert_eq!(ctx().fallback_message_id(), "cross-account-messages-2-77");
    }

    #[test]
    fn test_fallback_message_id_fits_storage_for_long_topic() {
        let mut delivery = ctx();
        delivery.topic = format!("{}-tail", "t".repeat(249));
        delivery.offset = i64::MAX;

        let id = delivery.fallback_message_id();
        assert!(id.len() <= MAX_MESSAGE_ID_LEN);
        assert!(id.ends_with(&format!("-tail-2-{}", i64::MAX)));
        assert!(relay_schema::validate_message_id(&id).is_ok());
    }

    #[test]
    fn test_storable_copy_fits_columns() {
        let message = RelayMessage {
            message_id: "m-1".to_string(),
            timestamp: Utc::now(),
            source_account: Some("s".repeat(400)),
            target_account: Some("account-a".to_string()),
            payload: "ping\u{0}pong".to_string(),
            message_type: "é".repeat(300),
            batch_id: "b".repeat(256),
            sequence_number: 1,
        };

        let record = ConsumedRecord::from_message(
            &message,
            &ctx(),
            ProcessingStatus::Failed,
            Some("value too long"),
        )
        .storable();

        assert_eq!(record.source_account.as_ref().map(|v| v.chars().count()), Some(255));
        assert_eq!(record.target_account.as_deref(), Some("account-a"));
        assert_eq!(record.message_type.as_ref().map(|v| v.chars().count()), Some(255));
        assert_eq!(record.batch_id.as_ref().map(|v| v.len()), Some(255));
        let payload = record.payload.unwrap();
        let text = payload.as_str().expect("payload kept as escaped text");
        assert!(!text.contains('\0'));
        assert!(text.contains("ping\\u0000pong"));
        assert_eq!(record.error_message.as_deref(), Some("value too long"));
    }

    #[test]
    fn test_storable_keeps_clean_payload_structured() {
        let record = ConsumedRecord::from_message(
            &RelayMessage {
                message_id: "m-2".to_string(),
                timestamp: Utc::now(),
                source_account: None,
                target_account: None,
                payload: "ping".to_string(),
                message_type: "connectivity-test".to_string(),
                batch_id: "b-1".to_string(),
                sequence_number: 1,
            },
            &ctx(),
            ProcessingStatus::Failed,
            None,
        )
        .storable();

        assert_eq!(record.payload.unwrap()["payload"], "ping");
    }

    #[test]
    fn test_dead_letter_escapes_nul() {
        let record = ConsumedRecord::dead_letter("m-9", "bad\u{0}body", "expected value", &ctx());
        assert_eq!(record.payload, Some(serde_json::json!("bad\\0body")));
    }

    #[test]
    fn test_dead_letter_record() {
        let record = ConsumedRecord::dead_letter("m-9", "{oops", "expected value", &ctx());
        assert_eq!(record.status, ProcessingStatus::Dlq);
        assert_eq!(record.payload, Some(serde_json::json!("{oops")));
        assert_eq!(record.offset, 77);
        assert_eq!(record.error_message.as_deref(), Some("expected value"));
    }
}
