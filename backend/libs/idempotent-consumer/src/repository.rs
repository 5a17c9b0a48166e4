//! Storage seam for consumption records

use crate::error::PersistenceResult;
use crate::record::{ConsumedRecord, ProcessingStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Columns the repository can aggregate on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    MessageType,
    Status,
}

impl GroupField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            GroupField::MessageType => "message_type",
            GroupField::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Conjunction of optional criteria; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<ProcessingStatus>,
    pub message_type: Option<String>,
    pub batch_id: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &ConsumedRecord) -> bool {
        self.from.map_or(true, |from| record.consumed_timestamp >= from)
            && self.to.map_or(true, |to| record.consumed_timestamp <= to)
            && self.status.map_or(true, |status| record.status == status)
            && self
                .message_type
                .as_ref()
                .map_or(true, |t| record.message_type.as_ref() == Some(t))
            && self
                .batch_id
                .as_ref()
                .map_or(true, |b| record.batch_id.as_ref() == Some(b))
    }
}

/// Zero-based page over records ordered by consumed timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub direction: SortDirection,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 1000;

    /// Size is clamped to `1..=MAX_SIZE`
    pub fn new(page: u32, size: u32, direction: SortDirection) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
            direction,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE, SortDirection::Desc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: i64) -> Self {
        let size = i64::from(request.size);
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
            total_pages: (total_elements + size - 1) / size,
        }
    }
}

#[async_trait]
pub trait ConsumedMessageRepository: Send + Sync {
    /// Insert a new record. Fails with `DuplicateMessageId` when the id is
    /// already stored.
    async fn save(&self, record: ConsumedRecord) -> PersistenceResult<ConsumedRecord>;

    async fn exists_by_message_id(&self, message_id: &str) -> PersistenceResult<bool>;

    async fn find_by_message_id(&self, message_id: &str)
        -> PersistenceResult<Option<ConsumedRecord>>;

    async fn find_by_batch_id(&self, batch_id: &str) -> PersistenceResult<Vec<ConsumedRecord>>;

    /// Records consumed at or after `since`, oldest first
    async fn find_since(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<ConsumedRecord>>;

    async fn count_since(&self, since: DateTime<Utc>) -> PersistenceResult<i64>;

    /// `None` when no record in the window has a duration
    async fn average_processing_time_since(
        &self,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Option<f64>>;

    async fn group_count_by(&self, field: GroupField) -> PersistenceResult<BTreeMap<String, i64>>;

    /// Newest first
    async fn find_recent(&self, limit: i64) -> PersistenceResult<Vec<ConsumedRecord>>;

    async fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> PersistenceResult<Page<ConsumedRecord>>;

    async fn health_check(&self) -> PersistenceResult<()>;
}

/// Key used when a grouped column is NULL
pub const UNKNOWN_GROUP: &str = "unknown";
