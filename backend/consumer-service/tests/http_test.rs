mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::{context, message};
use consumer_service::{handlers, AppState};
use delivery_metrics::MetricsAggregator;
use idempotent_consumer::{
    AckError, AckHandle, DeduplicatingProcessor, InMemoryConsumedMessageRepository,
    InboundPayload,
};
use serde_json::Value;
use std::sync::Arc;

struct NoopAck;

impl AckHandle for NoopAck {
    fn acknowledge(&self) -> Result<(), AckError> {
        Ok(())
    }
}

fn processor() -> Arc<DeduplicatingProcessor> {
    Arc::new(DeduplicatingProcessor::new(
        Arc::new(InMemoryConsumedMessageRepository::new()),
        Arc::new(MetricsAggregator::new("consumer")),
    ))
}

fn state(processor: Arc<DeduplicatingProcessor>) -> web::Data<AppState> {
    web::Data::new(AppState {
        processor,
        consumer_group: "relay-consumer".to_string(),
        admin_token: Some("s3cret".to_string()),
    })
}

async fn consume(processor: &DeduplicatingProcessor, message_id: &str, offset: i64) {
    processor
        .process(
            InboundPayload::Message(message(message_id)),
            &context(0, offset),
            &NoopAck,
        )
        .await;
}

#[actix_web::test]
async fn test_status_reports_counters_and_database() {
    let processor = processor();
    consume(&processor, "a", 0).await;
    consume(&processor, "b", 1).await;
    consume(&processor, "a", 2).await;

    let app = test::init_service(
        App::new()
            .app_data(state(processor))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/status")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["consumerGroup"], "relay-consumer");
    assert_eq!(body["status"], "ACTIVE");
    assert_eq!(body["totalMessagesConsumed"], 2);
    assert_eq!(body["totalSuccessfulMessages"], 2);
    assert_eq!(body["successRate"], 100.0);
    assert_eq!(body["messagesLastHour"], 2);
    assert_eq!(body["databaseStatus"], "CONNECTED");
    assert_ne!(body["lastConsumptionTime"], "Never");
}

#[actix_web::test]
async fn test_metrics_include_distributions() {
    let processor = processor();
    consume(&processor, "a", 0).await;
    processor
        .process(
            InboundPayload::decode(Some(&b"garbage"[..])),
            &context(0, 1),
            &NoopAck,
        )
        .await;

    let app = test::init_service(
        App::new()
            .app_data(state(processor))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/metrics")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["processingStatusDistribution"]["SUCCESS"], 1);
    assert_eq!(body["processingStatusDistribution"]["DLQ"], 1);
    assert_eq!(body["messageTypeDistribution"]["connectivity-test"], 1);
    assert_eq!(body["messagesLast5Minutes"], 2);
    assert_eq!(body["messagesLast24Hours"], 2);
    assert_eq!(body["totalFailedMessages"], 1);
}

#[actix_web::test]
async fn test_reset_requires_admin_token() {
    let app = test::init_service(
        App::new()
            .app_data(state(processor()))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/consumer/reset")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/v1/consumer/reset")
        .insert_header(("X-Admin-Token", "wrong"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/v1/consumer/reset")
        .insert_header(("X-Admin-Token", "s3cret"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("not implemented"));
}

#[actix_web::test]
async fn test_message_lookup_and_listing() {
    let processor = processor();
    for (offset, id) in ["m-1", "m-2", "m-3"].iter().enumerate() {
        consume(&processor, id, offset as i64).await;
    }

    let app = test::init_service(
        App::new()
            .app_data(state(processor))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/messages/m-2")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["messageId"], "m-2");
    assert_eq!(body["status"], "SUCCESS");

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/messages/missing")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/messages/recent")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 3);

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/messages?processingStatus=success&size=2&sortDirection=ASC")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["totalElements"], 3);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["content"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/messages?sortDirection=sideways")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_health_and_prometheus() {
    let app = test::init_service(
        App::new()
            .app_data(state(processor()))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/consumer/health")
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, "Consumer service is healthy");

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}
