use crate::error::{AppError, Result};
use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use idempotent_consumer::GroupField;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatusResponse {
    pub consumer_group: String,
    pub status: &'static str,
    pub total_messages_consumed: u64,
    pub total_successful_messages: u64,
    pub total_failed_messages: u64,
    pub success_rate: f64,
    pub last_consumption_time: String,
    pub avg_processing_time_ms: f64,
    pub messages_last_hour: i64,
    pub database_status: &'static str,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerMetricsResponse {
    pub total_messages_consumed: u64,
    pub total_successful_messages: u64,
    pub total_failed_messages: u64,
    pub success_rate: f64,
    pub last_consumption_time: String,
    pub uptime_seconds: i64,
    pub message_type_distribution: BTreeMap<String, i64>,
    pub processing_status_distribution: BTreeMap<String, i64>,
    pub messages_last5_minutes: i64,
    pub messages_last1_hour: i64,
    pub messages_last24_hours: i64,
}

/// GET /api/v1/consumer/status
///
/// Counters always come from memory; the database figures degrade to zero
/// with `databaseStatus: DISCONNECTED` when the store is unreachable.
pub async fn consumer_status(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.processor.metrics().snapshot();
    let repository = state.processor.repository();
    let one_hour_ago = Utc::now() - Duration::hours(1);

    let database = async {
        repository.health_check().await?;
        let count = repository.count_since(one_hour_ago).await?;
        let avg = repository.average_processing_time_since(one_hour_ago).await?;
        Ok::<_, idempotent_consumer::PersistenceError>((count, avg.unwrap_or(0.0)))
    }
    .await;

    let (database_status, messages_last_hour, avg_processing_time_ms) = match database {
        Ok((count, avg)) => ("CONNECTED", count, avg),
        Err(e) => {
            warn!(error = %e, "Database unavailable for status report");
            ("DISCONNECTED", 0, 0.0)
        }
    };

    HttpResponse::Ok().json(ConsumerStatusResponse {
        consumer_group: state.consumer_group.clone(),
        status: "ACTIVE",
        total_messages_consumed: snapshot.attempted,
        total_successful_messages: snapshot.succeeded,
        total_failed_messages: snapshot.failed,
        success_rate: snapshot.success_rate,
        last_consumption_time: snapshot.last_activity_display(),
        avg_processing_time_ms,
        messages_last_hour,
        database_status,
        uptime_seconds: snapshot.uptime_seconds,
    })
}

/// GET /api/v1/consumer/metrics
pub async fn consumer_metrics(state: web::Data<AppState>) -> Result<HttpResponse> {
    let snapshot = state.processor.metrics().snapshot();
    let repository = state.processor.repository();
    let now = Utc::now();

    Ok(HttpResponse::Ok().json(ConsumerMetricsResponse {
        total_messages_consumed: snapshot.attempted,
        total_successful_messages: snapshot.succeeded,
        total_failed_messages: snapshot.failed,
        success_rate: snapshot.success_rate,
        last_consumption_time: snapshot.last_activity_display(),
        uptime_seconds: snapshot.uptime_seconds,
        message_type_distribution: repository.group_count_by(GroupField::MessageType).await?,
        processing_status_distribution: repository.group_count_by(GroupField::Status).await?,
        messages_last5_minutes: repository.count_since(now - Duration::minutes(5)).await?,
        messages_last1_hour: repository.count_since(now - Duration::hours(1)).await?,
        messages_last24_hours: repository.count_since(now - Duration::hours(24)).await?,
    }))
}

/// POST /api/v1/consumer/reset
///
/// Offset reset is not supported; the endpoint only checks the admin token
/// and says so.
pub async fn reset_offsets(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let presented = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    let authorized = matches!(
        (state.admin_token.as_deref(), presented),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return Err(AppError::Unauthorized);
    }

    warn!(consumer_group = %state.consumer_group, "Consumer offset reset requested");
    Ok(HttpResponse::Ok().body("Consumer offset reset is not implemented"))
}

/// GET /api/v1/consumer/health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("Consumer service is healthy")
}

/// GET /metrics
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
