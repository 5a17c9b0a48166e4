use crate::error::{AppError, Result};
use crate::services::BatchRequest;
use crate::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

/// POST /api/v1/produce
pub async fn produce_messages(
    state: web::Data<AppState>,
    request: web::Json<BatchRequest>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    if request.is_payload_blank() {
        return Err(AppError::Validation("Payload cannot be blank".to_string()));
    }
    if request.contains_nul() {
        return Err(AppError::Validation(
            "Fields cannot contain NUL characters".to_string(),
        ));
    }
    request.validate()?;
    if request.batch_size > state.max_batch_size {
        return Err(AppError::Validation(format!(
            "Batch size cannot exceed {}",
            state.max_batch_size
        )));
    }

    info!(
        batch_size = request.batch_size,
        message_type = %request.message_type,
        "Received produce request"
    );

    let result = state.coordinator.produce_batch(&request).await;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTestQuery {
    #[serde(default = "default_message_count")]
    pub message_count: u32,
    #[serde(default = "default_payload_prefix")]
    pub payload_prefix: String,
}

fn default_message_count() -> u32 {
    100
}

fn default_payload_prefix() -> String {
    "test-batch".to_string()
}

/// POST /api/v1/test/batch?messageCount=100&payloadPrefix=test-batch
pub async fn batch_test(
    state: web::Data<AppState>,
    query: web::Query<BatchTestQuery>,
) -> Result<HttpResponse> {
    let request = BatchRequest::new(
        format!("{} - Batch test message", query.payload_prefix),
        query.message_count,
    )
    .with_message_type("batch-test")
    .with_accounts("account-b", "account-a");

    if request.contains_nul() {
        return Err(AppError::Validation(
            "Fields cannot contain NUL characters".to_string(),
        ));
    }
    request.validate()?;
    if request.batch_size > state.max_batch_size {
        return Err(AppError::Validation(format!(
            "Batch size cannot exceed {}",
            state.max_batch_size
        )));
    }

    info!(message_count = query.message_count, "Running batch production test");
    let result = state.coordinator.produce_batch(&request).await;
    Ok(HttpResponse::Ok().json(result))
}
