//! # Idempotent Kafka Consumer Library
//!
//! Gives relayed messages an exactly-once *effect* on top of at-least-once
//! delivery. Every delivery is checked against the `consumed_messages` table
//! by message id; new messages get an audit record and only then is the
//! broker offset committed.
//!
//! ## Architecture
//!
//! ```text
//! Kafka → DeliveryContext + InboundPayload
//!              ↓
//!     DeduplicatingProcessor ── exists? / save ──▶ ConsumedMessageRepository
//!              ↓                                      (PostgreSQL or in-memory)
//!          AckHandle (offset commit)
//! ```
//!
//! The unique constraint on `consumed_messages.message_id` is the source of
//! truth. The existence check is a fast path; a uniqueness violation on
//! insert is treated exactly like a duplicate found by the check, so two
//! consumers racing on a rebalanced partition never produce two records.
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{DeduplicatingProcessor, InboundPayload, SqlxConsumedMessageRepository};
//!
//! let repository = Arc::new(SqlxConsumedMessageRepository::new(pool));
//! let processor = DeduplicatingProcessor::new(repository, metrics);
//!
//! let outcome = processor
//!     .process(InboundPayload::decode(message.payload()), &ctx, &ack)
//!     .await;
//! ```
//!
//! ## Database Migration
//!
//! [`run_migrations`] applies `migrations/001_create_consumed_messages.sql`.

mod ack;
mod error;
mod memory;
mod postgres;
mod processor;
mod record;
mod repository;

pub use ack::{AckError, AckHandle};
pub use error::{PersistenceError, PersistenceResult};
pub use memory::InMemoryConsumedMessageRepository;
pub use postgres::{run_migrations, SqlxConsumedMessageRepository};
pub use processor::{DeduplicatingProcessor, InboundPayload, ProcessingOutcome};
pub use record::{
    truncate_error, ConsumedRecord, DeliveryContext, ProcessingStatus, MAX_ERROR_MESSAGE_LEN,
};
pub use repository::{
    ConsumedMessageRepository, GroupField, Page, PageRequest, RecordFilter, SortDirection,
    UNKNOWN_GROUP,
};
