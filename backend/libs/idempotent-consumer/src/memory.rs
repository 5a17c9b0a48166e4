//! Process-local [`ConsumedMessageRepository`] for tests and local runs

use crate::error::{PersistenceError, PersistenceResult};
use crate::record::ConsumedRecord;
use crate::repository::{
    ConsumedMessageRepository, GroupField, Page, PageRequest, RecordFilter, SortDirection,
    UNKNOWN_GROUP,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Uniqueness on `message_id` is enforced under the write lock, matching the
/// PostgreSQL constraint.
#[derive(Default)]
pub struct InMemoryConsumedMessageRepository {
    records: RwLock<Vec<ConsumedRecord>>,
}

impl InMemoryConsumedMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn sort_by_consumed(records: &mut [ConsumedRecord], direction: SortDirection) {
    records.sort_by(|a, b| {
        let ordering = a
            .consumed_timestamp
            .cmp(&b.consumed_timestamp)
            .then(a.id.cmp(&b.id));
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl ConsumedMessageRepository for InMemoryConsumedMessageRepository {
    async fn save(&self, mut record: ConsumedRecord) -> PersistenceResult<ConsumedRecord> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.message_id == record.message_id) {
            return Err(PersistenceError::DuplicateMessageId(record.message_id));
        }
        record.id = Some(records.len() as i64 + 1);
        records.push(record.clone());
        Ok(record)
    }

    async fn exists_by_message_id(&self, message_id: &str) -> PersistenceResult<bool> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .any(|r| r.message_id == message_id))
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> PersistenceResult<Option<ConsumedRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.message_id == message_id)
            .cloned())
    }

    async fn find_by_batch_id(&self, batch_id: &str) -> PersistenceResult<Vec<ConsumedRecord>> {
        let mut found: Vec<ConsumedRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.sequence_number, r.id));
        Ok(found)
    }

    async fn find_since(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<ConsumedRecord>> {
        let mut found: Vec<ConsumedRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.consumed_timestamp >= since)
            .cloned()
            .collect();
        sort_by_consumed(&mut found, SortDirection::Asc);
        Ok(found)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> PersistenceResult<i64> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.consumed_timestamp >= since)
            .count() as i64)
    }

    async fn average_processing_time_since(
        &self,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Option<f64>> {
        let records = self.records.read().await;
        let durations: Vec<i64> = records
            .iter()
            .filter(|r| r.consumed_timestamp >= since)
            .filter_map(|r| r.processing_duration_ms)
            .collect();

        if durations.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            durations.iter().sum::<i64>() as f64 / durations.len() as f64,
        ))
    }

    async fn group_count_by(&self, field: GroupField) -> PersistenceResult<BTreeMap<String, i64>> {
        let mut groups = BTreeMap::new();
        for record in self.records.read().await.iter() {
            let key = match field {
                GroupField::MessageType => record
                    .message_type
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_GROUP.to_string()),
                GroupField::Status => record.status.as_str().to_string(),
            };
            *groups.entry(key).or_insert(0) += 1;
        }
        Ok(groups)
    }

    async fn find_recent(&self, limit: i64) -> PersistenceResult<Vec<ConsumedRecord>> {
        let mut records = self.records.read().await.clone();
        sort_by_consumed(&mut records, SortDirection::Desc);
        records.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(records)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> PersistenceResult<Page<ConsumedRecord>> {
        let mut matching: Vec<ConsumedRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_by_consumed(&mut matching, page.direction);

        let total = matching.len() as i64;
        let content = matching
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.size as usize)
            .collect();

        Ok(Page::new(content, page, total))
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DeliveryContext, ProcessingStatus};
    use relay_schema::RelayMessage;

    fn record(message_id: &str, batch: &str, seq: u32, message_type: &str) -> ConsumedRecord {
        let message = RelayMessage {
            message_id: message_id.to_string(),
            timestamp: Utc::now(),
            source_account: Some("account-b".to_string()),
            target_account: Some("account-a".to_string()),
            payload: "ping".to_string(),
            message_type: message_type.to_string(),
            batch_id: batch.to_string(),
            sequence_number: seq,
        };
        let ctx = DeliveryContext {
            topic: "cross-account-messages".to_string(),
            partition: 0,
            offset: i64::from(seq),
            consumer_group: "relay-consumer".to_string(),
            received_at: Utc::now(),
            key: Some(message_id.to_string()),
        };
        ConsumedRecord::from_message(&message, &ctx, ProcessingStatus::Success, None)
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_id() {
        let repo = InMemoryConsumedMessageRepository::new();
        let saved = repo.save(record("m-1", "b-1", 1, "ping")).await.unwrap();
        assert_eq!(saved.id, Some(1));

        let err = repo.save(record("m-1", "b-1", 1, "ping")).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_group_count_and_batch_lookup() {
        let repo = InMemoryConsumedMessageRepository::new();
        repo.save(record("m-2", "b-1", 2, "ping")).await.unwrap();
        repo.save(record("m-1", "b-1", 1, "ping")).await.unwrap();
        repo.save(record("m-3", "b-2", 1, "batch-test")).await.unwrap();

        let by_type = repo.group_count_by(GroupField::MessageType).await.unwrap();
        assert_eq!(by_type.get("ping"), Some(&2));
        assert_eq!(by_type.get("batch-test"), Some(&1));

        let by_status = repo.group_count_by(GroupField::Status).await.unwrap();
        assert_eq!(by_status.get("SUCCESS"), Some(&3));

        let batch: Vec<String> = repo
            .find_by_batch_id("b-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(batch, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let repo = InMemoryConsumedMessageRepository::new();
        for i in 1..=5 {
            repo.save(record(&format!("m-{}", i), "b-1", i, "ping"))
                .await
                .unwrap();
        }
        repo.save(record("other", "b-2", 1, "batch-test")).await.unwrap();

        let filter = RecordFilter {
            batch_id: Some("b-1".to_string()),
            ..Default::default()
        };
        let page = repo
            .query(&filter, &PageRequest::new(1, 2, SortDirection::Asc))
            .await
            .unwrap();

        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.content.len(), 2);
        assert!(page.content.iter().all(|r| r.batch_id.as_deref() == Some("b-1")));
    }

    #[tokio::test]
    async fn test_windowed_aggregates() {
        let repo = InMemoryConsumedMessageRepository::new();
        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(repo.average_processing_time_since(since).await.unwrap(), None);

        let mut first = record("m-1", "b-1", 1, "ping");
        first.processing_duration_ms = Some(10);
        let mut second = record("m-2", "b-1", 2, "ping");
        second.processing_duration_ms = Some(30);
        repo.save(first).await.unwrap();
        repo.save(second).await.unwrap();

        assert_eq!(repo.count_since(since).await.unwrap(), 2);
        assert_eq!(
            repo.average_processing_time_since(since).await.unwrap(),
            Some(20.0)
        );
        assert_eq!(repo.find_recent(1).await.unwrap().len(), 1);
        assert_eq!(
            repo.count_since(Utc::now() + chrono::Duration::hours(1))
                .await
                .unwrap(),
            0
        );
    }
}
