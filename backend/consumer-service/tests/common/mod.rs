#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consumer_service::consumers::{Delivery, PartitionControl};
use consumer_service::error::SeekError;
use idempotent_consumer::{
    AckError, ConsumedMessageRepository, ConsumedRecord, DeliveryContext, GroupField,
    InMemoryConsumedMessageRepository, InboundPayload, Page, PageRequest, PersistenceError,
    PersistenceResult, RecordFilter,
};
use relay_schema::{MessageIdentity, RelayMessage};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::time::Instant;

pub const TOPIC: &str = "cross-account-messages";
pub const GROUP: &str = "relay-consumer";

pub fn message(message_id: &str) -> RelayMessage {
    RelayMessage {
        message_id: message_id.to_string(),
        timestamp: Utc::now(),
        source_account: Some("account-b".to_string()),
        target_account: Some("account-a".to_string()),
        payload: "ping".to_string(),
        message_type: "connectivity-test".to_string(),
        batch_id: MessageIdentity::new_batch_id(),
        sequence_number: 1,
    }
}

pub fn context(partition: i32, offset: i64) -> DeliveryContext {
    DeliveryContext {
        topic: TOPIC.to_string(),
        partition,
        offset,
        consumer_group: GROUP.to_string(),
        received_at: Utc::now(),
        key: None,
    }
}

pub fn delivery(partition: i32, offset: i64, message_id: &str) -> Delivery {
    Delivery {
        payload: InboundPayload::Message(message(message_id)),
        context: context(partition, offset),
    }
}

/// Records commits and rewinds instead of talking to a broker
#[derive(Default)]
pub struct RecordingControl {
    commits: Mutex<Vec<(i32, i64)>>,
    rewinds: Mutex<Vec<(i32, i64)>>,
    rewound_at: Mutex<Vec<Instant>>,
}

impl RecordingControl {
    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn commits_for(&self, partition: i32) -> Vec<i64> {
        self.commits()
            .into_iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, offset)| offset)
            .collect()
    }

    pub fn rewinds(&self) -> Vec<(i32, i64)> {
        self.rewinds.lock().unwrap().clone()
    }

    pub fn rewound_at(&self) -> Vec<Instant> {
        self.rewound_at.lock().unwrap().clone()
    }
}

impl PartitionControl for RecordingControl {
    fn commit(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), AckError> {
        self.commits.lock().unwrap().push((partition, offset));
        Ok(())
    }

    fn rewind(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), SeekError> {
        self.rewinds.lock().unwrap().push((partition, offset));
        self.rewound_at.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

/// In-memory repository whose saves fail a set number of times per id
#[derive(Default)]
pub struct FlakyRepository {
    inner: InMemoryConsumedMessageRepository,
    failures: Mutex<HashMap<String, u32>>,
}

impl FlakyRepository {
    pub fn fail_saves(&self, message_id: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(message_id.to_string(), times);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn take_failure(&self, message_id: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(message_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ConsumedMessageRepository for FlakyRepository {
    async fn save(&self, record: ConsumedRecord) -> PersistenceResult<ConsumedRecord> {
        if self.take_failure(&record.message_id) {
            return Err(PersistenceError::Unavailable("connection reset".to_string()));
        }
        self.inner.save(record).await
    }

    async fn exists_by_message_id(&self, message_id: &str) -> PersistenceResult<bool> {
        self.inner.exists_by_message_id(message_id).await
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> PersistenceResult<Option<ConsumedRecord>> {
        self.inner.find_by_message_id(message_id).await
    }

    async fn find_by_batch_id(&self, batch_id: &str) -> PersistenceResult<Vec<ConsumedRecord>> {
        self.inner.find_by_batch_id(batch_id).await
    }

    async fn find_since(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<ConsumedRecord>> {
        self.inner.find_since(since).await
    }

    async fn count_since(&self, since: DateTime<Utc>) -> PersistenceResult<i64> {
        self.inner.count_since(since).await
    }

    async fn average_processing_time_since(
        &self,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Option<f64>> {
        self.inner.average_processing_time_since(since).await
    }

    async fn group_count_by(&self, field: GroupField) -> PersistenceResult<BTreeMap<String, i64>> {
        self.inner.group_count_by(field).await
    }

    async fn find_recent(&self, limit: i64) -> PersistenceResult<Vec<ConsumedRecord>> {
        self.inner.find_recent(limit).await
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> PersistenceResult<Page<ConsumedRecord>> {
        self.inner.query(filter, page).await
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        self.inner.health_check().await
    }
}
