use crate::services::ConnectionStatus;
use crate::AppState;
use actix_web::{web, HttpResponse};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerMetricsResponse {
    pub total_messages_produced: u64,
    pub total_successful_messages: u64,
    pub total_failed_messages: u64,
    pub total_batches: u64,
    pub avg_messages_per_second: f64,
    pub avg_batch_size: f64,
    pub success_rate: f64,
    pub last_production_time: String,
    pub connection_status: ConnectionStatus,
    pub uptime_seconds: i64,
}

/// GET /api/v1/metrics
pub async fn producer_metrics(state: web::Data<AppState>) -> HttpResponse {
    let publisher = state.coordinator.publisher();
    let snapshot = publisher.metrics().snapshot();
    let connection_status = publisher.connection_status().await;

    HttpResponse::Ok().json(ProducerMetricsResponse {
        total_messages_produced: snapshot.attempted,
        total_successful_messages: snapshot.succeeded,
        total_failed_messages: snapshot.failed,
        total_batches: snapshot.batches,
        avg_messages_per_second: snapshot.avg_messages_per_second(),
        avg_batch_size: snapshot.avg_batch_size(),
        success_rate: snapshot.success_rate,
        last_production_time: snapshot.last_activity_display(),
        connection_status,
        uptime_seconds: snapshot.uptime_seconds,
    })
}

/// GET /api/v1/health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("Producer service is healthy")
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
