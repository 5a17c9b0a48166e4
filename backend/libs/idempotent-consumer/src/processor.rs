//! Idempotent processing of one inbound delivery
//!
//! ```text
//! RECEIVED ── exists ──────────────────────────────▶ DUPLICATE ─ ack
//!     │
//!     └── new ─▶ PROCESSING ── insert SUCCESS ok ──▶ PERSISTED_SUCCESS ─ ack
//!                    │
//!                    └── insert failed ── insert FAILED ok ──▶ PERSISTED_FAILURE ─ ack
//!                                              │
//!                                              └── failed ──▶ PERSIST_FAILED (no ack)
//! ```
//!
//! An acknowledgment is only issued once a durable record of the outcome
//! exists, either written by this call or found already stored.

use crate::ack::AckHandle;
use crate::error::PersistenceError;
use crate::record::{ConsumedRecord, DeliveryContext, ProcessingStatus};
use crate::repository::ConsumedMessageRepository;
use delivery_metrics::MetricsAggregator;
use relay_schema::{validate_message_id, RelayMessage};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Decoded body of a delivery
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Message(RelayMessage),
    /// Body could not be decoded into a [`RelayMessage`]
    Undecodable { raw: String, reason: String },
}

impl InboundPayload {
    pub fn decode(bytes: Option<&[u8]>) -> Self {
        match bytes {
            None => InboundPayload::Undecodable {
                raw: String::new(),
                reason: "Empty message payload".to_string(),
            },
            Some(bytes) => match RelayMessage::from_slice(bytes) {
                Ok(message) => InboundPayload::Message(message),
                Err(e) => InboundPayload::Undecodable {
                    raw: String::from_utf8_lossy(bytes).into_owned(),
                    reason: format!("Failed to decode message: {}", e),
                },
            },
        }
    }

    /// Dedup identity: the payload id, else the broker key, else the
    /// delivery coordinates
    pub fn message_id(&self, ctx: &DeliveryContext) -> String {
        match self {
            InboundPayload::Message(message) => message.message_id.clone(),
            InboundPayload::Undecodable { .. } => ctx
                .key
                .as_deref()
                .filter(|key| validate_message_id(key).is_ok())
                .map(str::to_string)
                .unwrap_or_else(|| ctx.fallback_message_id()),
        }
    }
}

/// Terminal state of [`DeduplicatingProcessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// A record already existed; acknowledged without writing
    Duplicate,
    /// SUCCESS record written and acknowledged
    Persisted,
    /// Primary write failed, FAILED record written and acknowledged
    FailureRecorded { error: String },
    /// Undecodable delivery recorded as DLQ and acknowledged
    DeadLettered { reason: String },
    /// No record could be written; left unacknowledged for redelivery
    Unrecorded { error: String },
}

impl ProcessingOutcome {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, ProcessingOutcome::Unrecorded { .. })
    }
}

enum WriteResult {
    Stored,
    AlreadyStored,
    Failed(PersistenceError),
}

pub struct DeduplicatingProcessor {
    repository: Arc<dyn ConsumedMessageRepository>,
    metrics: Arc<MetricsAggregator>,
}

impl DeduplicatingProcessor {
    pub fn new(
        repository: Arc<dyn ConsumedMessageRepository>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            repository,
            metrics,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ConsumedMessageRepository> {
        &self.repository
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub async fn process(
        &self,
        payload: InboundPayload,
        ctx: &DeliveryContext,
        ack: &dyn AckHandle,
    ) -> ProcessingOutcome {
        let message_id = payload.message_id(ctx);

        match self.repository.exists_by_message_id(&message_id).await {
            Ok(true) => return self.duplicate(&message_id, ctx, ack),
            Ok(false) => {}
            Err(e) => {
                // unique constraint still guards the insert below
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "Duplicate check failed, relying on storage constraint"
                );
            }
        }

        let outcome = match payload {
            InboundPayload::Message(message) => self.persist_message(&message, ctx).await,
            InboundPayload::Undecodable { raw, reason } => {
                self.persist_dead_letter(&message_id, &raw, reason, ctx).await
            }
        };

        match &outcome {
            ProcessingOutcome::Duplicate => return self.duplicate(&message_id, ctx, ack),
            ProcessingOutcome::Persisted => {
                self.metrics.record_attempt();
                self.metrics.record_success();
            }
            ProcessingOutcome::FailureRecorded { .. }
            | ProcessingOutcome::DeadLettered { .. }
            | ProcessingOutcome::Unrecorded { .. } => {
                self.metrics.record_attempt();
                self.metrics.record_failure();
            }
        }

        if outcome.is_acknowledged() {
            self.acknowledge(&message_id, ctx, ack);
        }
        outcome
    }

    async fn persist_message(
        &self,
        message: &RelayMessage,
        ctx: &DeliveryContext,
    ) -> ProcessingOutcome {
        let record = ConsumedRecord::from_message(message, ctx, ProcessingStatus::Success, None);

        let primary_error = match self.write(record).await {
            WriteResult::Stored => {
                debug!(
                    message_id = %message.message_id,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    "Message processed"
                );
                return ProcessingOutcome::Persisted;
            }
            WriteResult::AlreadyStored => return ProcessingOutcome::Duplicate,
            WriteResult::Failed(e) => e.to_string(),
        };

        error!(
            message_id = %message.message_id,
            partition = ctx.partition,
            offset = ctx.offset,
            error = %primary_error,
            "Failed to persist consumed message, recording failure"
        );

        // the primary write may have failed on the message's own data
        let failure = ConsumedRecord::from_message(
            message,
            ctx,
            ProcessingStatus::Failed,
            Some(&primary_error),
        )
        .storable();
        match self.write(failure).await {
            WriteResult::Stored => ProcessingOutcome::FailureRecorded {
                error: primary_error,
            },
            WriteResult::AlreadyStored => ProcessingOutcome::Duplicate,
            WriteResult::Failed(e) => {
                error!(
                    message_id = %message.message_id,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    error = %e,
                    "Failed to record failure, leaving message for redelivery"
                );
                ProcessingOutcome::Unrecorded {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn persist_dead_letter(
        &self,
        message_id: &str,
        raw: &str,
        reason: String,
        ctx: &DeliveryContext,
    ) -> ProcessingOutcome {
        warn!(
            message_id = %message_id,
            partition = ctx.partition,
            offset = ctx.offset,
            reason = %reason,
            "Undecodable message, recording as dead letter"
        );

        let record = ConsumedRecord::dead_letter(message_id, raw, &reason, ctx);
        match self.write(record).await {
            WriteResult::Stored => ProcessingOutcome::DeadLettered { reason },
            WriteResult::AlreadyStored => ProcessingOutcome::Duplicate,
            WriteResult::Failed(e) => {
                error!(
                    message_id = %message_id,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    error = %e,
                    "Failed to record dead letter, leaving message for redelivery"
                );
                ProcessingOutcome::Unrecorded {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn write(&self, record: ConsumedRecord) -> WriteResult {
        match self.repository.save(record).await {
            Ok(_) => WriteResult::Stored,
            Err(e) if e.is_duplicate_key() => WriteResult::AlreadyStored,
            Err(e) => WriteResult::Failed(e),
        }
    }

    fn duplicate(
        &self,
        message_id: &str,
        ctx: &DeliveryContext,
        ack: &dyn AckHandle,
    ) -> ProcessingOutcome {
        warn!(
            message_id = %message_id,
            partition = ctx.partition,
            offset = ctx.offset,
            "Duplicate message, skipping"
        );
        self.metrics.touch();
        self.acknowledge(message_id, ctx, ack);
        ProcessingOutcome::Duplicate
    }

    fn acknowledge(&self, message_id: &str, ctx: &DeliveryContext, ack: &dyn AckHandle) {
        // the record is durable; a lost commit only causes a deduplicated redelivery
        if let Err(e) = ack.acknowledge() {
            warn!(
                message_id = %message_id,
                partition = ctx.partition,
                offset = ctx.offset,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}
