//! PostgreSQL-backed [`ConsumedMessageRepository`]

use crate::error::{is_unique_violation, PersistenceError, PersistenceResult};
use crate::record::ConsumedRecord;
use crate::repository::{
    ConsumedMessageRepository, GroupField, Page, PageRequest, RecordFilter, UNKNOWN_GROUP,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use tracing::debug;

const RECORD_COLUMNS: &str = "id, message_id, original_timestamp, consumed_timestamp, \
     source_account, target_account, message_type, payload, batch_id, sequence_number, \
     processing_duration_ms, partition_id, offset_value, consumer_group, status, \
     error_message, retry_count";

/// Apply the bundled migrations to `pool`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Clone)]
pub struct SqlxConsumedMessageRepository {
    pool: PgPool,
}

impl SqlxConsumedMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> PersistenceResult<ConsumedRecord> {
    let status: String = row.try_get("status")?;
    Ok(ConsumedRecord {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        original_timestamp: row.try_get("original_timestamp")?,
        consumed_timestamp: row.try_get("consumed_timestamp")?,
        source_account: row.try_get("source_account")?,
        target_account: row.try_get("target_account")?,
        message_type: row.try_get("message_type")?,
        payload: row.try_get("payload")?,
        batch_id: row.try_get("batch_id")?,
        sequence_number: row.try_get("sequence_number")?,
        processing_duration_ms: row.try_get("processing_duration_ms")?,
        partition: row.try_get("partition_id")?,
        offset: row.try_get("offset_value")?,
        consumer_group: row.try_get("consumer_group")?,
        status: status.parse().map_err(PersistenceError::InvalidRecord)?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(from) = filter.from {
        builder.push(" AND consumed_timestamp >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND consumed_timestamp <= ").push_bind(to);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(message_type) = &filter.message_type {
        builder
            .push(" AND message_type = ")
            .push_bind(message_type.clone());
    }
    if let Some(batch_id) = &filter.batch_id {
        builder.push(" AND batch_id = ").push_bind(batch_id.clone());
    }
}

#[async_trait]
impl ConsumedMessageRepository for SqlxConsumedMessageRepository {
    async fn save(&self, record: ConsumedRecord) -> PersistenceResult<ConsumedRecord> {
        let query = format!(
            r#"
            INSERT INTO consumed_messages (
                message_id, original_timestamp, consumed_timestamp, source_account,
                target_account, message_type, payload, batch_id, sequence_number,
                processing_duration_ms, partition_id, offset_value, consumer_group,
                status, error_message, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&record.message_id)
            .bind(record.original_timestamp)
            .bind(record.consumed_timestamp)
            .bind(&record.source_account)
            .bind(&record.target_account)
            .bind(&record.message_type)
            .bind(&record.payload)
            .bind(&record.batch_id)
            .bind(record.sequence_number)
            .bind(record.processing_duration_ms)
            .bind(record.partition)
            .bind(record.offset)
            .bind(&record.consumer_group)
            .bind(record.status.as_str())
            .bind(&record.error_message)
            .bind(record.retry_count)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    PersistenceError::DuplicateMessageId(record.message_id.clone())
                } else {
                    PersistenceError::from(e)
                }
            })?;

        let saved = record_from_row(&row)?;
        debug!(
            message_id = %saved.message_id,
            status = %saved.status,
            id = ?saved.id,
            "Consumed record stored"
        );
        Ok(saved)
    }

    async fn exists_by_message_id(&self, message_id: &str) -> PersistenceResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM consumed_messages WHERE message_id = $1
            ) AS exists
            "#,
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("exists")?)
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> PersistenceResult<Option<ConsumedRecord>> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM consumed_messages WHERE message_id = $1");
        let row = sqlx::query(&query)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_batch_id(&self, batch_id: &str) -> PersistenceResult<Vec<ConsumedRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM consumed_messages WHERE batch_id = $1 \
             ORDER BY sequence_number ASC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn find_since(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<ConsumedRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM consumed_messages WHERE consumed_timestamp >= $1 \
             ORDER BY consumed_timestamp ASC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_since(&self, since: DateTime<Utc>) -> PersistenceResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM consumed_messages WHERE consumed_timestamp >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }

    async fn average_processing_time_since(
        &self,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT AVG(processing_duration_ms)::FLOAT8 AS avg_ms
            FROM consumed_messages
            WHERE consumed_timestamp >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("avg_ms")?)
    }

    async fn group_count_by(&self, field: GroupField) -> PersistenceResult<BTreeMap<String, i64>> {
        let query = format!(
            "SELECT COALESCE({column}, '{UNKNOWN_GROUP}') AS group_key, COUNT(*) AS count \
             FROM consumed_messages GROUP BY 1",
            column = field.column()
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut groups: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            groups.insert(row.try_get("group_key")?, row.try_get("count")?);
        }
        Ok(groups)
    }

    async fn find_recent(&self, limit: i64) -> PersistenceResult<Vec<ConsumedRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM consumed_messages \
             ORDER BY consumed_timestamp DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> PersistenceResult<Page<ConsumedRecord>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) AS count FROM consumed_messages");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        let mut select = QueryBuilder::new(format!(
            "SELECT {RECORD_COLUMNS} FROM consumed_messages"
        ));
        push_filter(&mut select, filter);
        let direction = page.direction.as_sql();
        select
            .push(format!(
                " ORDER BY consumed_timestamp {direction}, id {direction} LIMIT "
            ))
            .push_bind(i64::from(page.size))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build().fetch_all(&self.pool).await?;
        let content = rows
            .iter()
            .map(record_from_row)
            .collect::<PersistenceResult<Vec<_>>>()?;

        Ok(Page::new(content, page, total))
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
