//! Batch submission: one batch id, `batch_size` messages, per-message
//! rejection never aborts the batch

use crate::services::publisher::{PendingOutcome, Publisher};
use crate::services::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use relay_schema::{MessageIdentity, RelayMessage, DEFAULT_MESSAGE_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use validator::Validate;

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

fn default_batch_size() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[validate(length(min = 1, message = "Payload cannot be blank"))]
    pub payload: String,
    #[serde(default = "default_message_type")]
    #[validate(length(max = 100, message = "Message type cannot exceed 100 characters"))]
    pub message_type: String,
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1000, message = "Batch size must be between 1 and 1000"))]
    pub batch_size: u32,
    #[validate(length(max = 50, message = "Source account cannot exceed 50 characters"))]
    pub source_account: Option<String>,
    #[validate(length(max = 50, message = "Target account cannot exceed 50 characters"))]
    pub target_account: Option<String>,
}

impl BatchRequest {
    pub fn new(payload: impl Into<String>, batch_size: u32) -> Self {
        Self {
            payload: payload.into(),
            message_type: default_message_type(),
            batch_size,
            source_account: None,
            target_account: None,
        }
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_accounts(
        mut self,
        source_account: impl Into<String>,
        target_account: impl Into<String>,
    ) -> Self {
        self.source_account = Some(source_account.into());
        self.target_account = Some(target_account.into());
        self
    }

    pub fn is_payload_blank(&self) -> bool {
        self.payload.trim().is_empty()
    }

    /// The consumer's store cannot hold NUL in any text field
    pub fn contains_nul(&self) -> bool {
        [
            Some(self.payload.as_str()),
            Some(self.message_type.as_str()),
            self.source_account.as_deref(),
            self.target_account.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|value| value.contains('\0'))
    }
}

/// Submission summary; delivery results may still be in flight when returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub requested_count: u32,
    pub accepted_count: u32,
    pub rejected_count: u32,
    pub message_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error_summary: Option<String>,
}

pub struct BatchCoordinator {
    publisher: Publisher,
    rate_limiter: RateLimiter,
    topic: String,
}

impl BatchCoordinator {
    pub fn new(publisher: Publisher, rate_limiter: RateLimiter, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            rate_limiter,
            topic: topic.into(),
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn produce_batch(&self, request: &BatchRequest) -> BatchResult {
        self.produce_batch_tracked(request).await.0
    }

    /// Like [`produce_batch`](Self::produce_batch), also returning a handle per
    /// accepted message for callers that need delivery confirmation
    pub async fn produce_batch_tracked(
        &self,
        request: &BatchRequest,
    ) -> (BatchResult, Vec<PendingOutcome>) {
        let batch_id = MessageIdentity::new_batch_id();
        let started_at = Utc::now();
        let batch_size = request.batch_size as usize;

        info!(
            batch_id = %batch_id,
            batch_size,
            message_type = %request.message_type,
            "Starting batch production"
        );

        let mut message_ids = Vec::with_capacity(batch_size);
        let mut pending = Vec::with_capacity(batch_size);
        let mut rejected_count = 0u32;
        let mut error_summary = String::new();

        for index in 0..batch_size {
            self.rate_limiter.throttle(index).await;

            let message = RelayMessage {
                message_id: MessageIdentity::new_message_id(),
                timestamp: Utc::now(),
                source_account: request.source_account.clone(),
                target_account: request.target_account.clone(),
                payload: request.payload.clone(),
                message_type: request.message_type.clone(),
                batch_id: batch_id.clone(),
                sequence_number: index as u32 + 1,
            };
            message_ids.push(message.message_id.clone());

            match self
                .publisher
                .send(&self.topic, &message.message_id, &message)
            {
                Ok(outcome) => pending.push(outcome),
                Err(e) => {
                    rejected_count += 1;
                    error!(
                        batch_id = %batch_id,
                        message_id = %message.message_id,
                        error = %e,
                        "Error sending message"
                    );
                    error_summary.push_str(&format!("Message {}: {}; ", message.message_id, e));
                }
            }
        }

        self.publisher.metrics().record_batch();

        let completed_at = Utc::now();
        let result = BatchResult {
            batch_id,
            requested_count: request.batch_size,
            accepted_count: request.batch_size - rejected_count,
            rejected_count,
            message_ids,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0),
            error_summary: (!error_summary.is_empty()).then_some(error_summary),
        };

        info!(
            batch_id = %result.batch_id,
            accepted = result.accepted_count,
            rejected = result.rejected_count,
            duration_ms = result.duration_ms,
            "Batch production completed"
        );

        (result, pending)
    }
}
