use crate::error::{AppError, Result};
use crate::AppState;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use idempotent_consumer::{PageRequest, ProcessingStatus, RecordFilter, SortDirection};
use serde::Deserialize;

pub const RECENT_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub processing_status: Option<String>,
    pub message_type: Option<String>,
    pub batch_id: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort_direction: Option<String>,
}

impl MessageQuery {
    pub fn filter(&self) -> Result<RecordFilter> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(AppError::BadRequest(
                    "startTime must not be after endTime".to_string(),
                ));
            }
        }

        let status = self
            .processing_status
            .as_deref()
            .map(str::parse::<ProcessingStatus>)
            .transpose()
            .map_err(AppError::BadRequest)?;

        Ok(RecordFilter {
            from: self.start_time,
            to: self.end_time,
            status,
            message_type: self.message_type.clone(),
            batch_id: self.batch_id.clone(),
        })
    }

    pub fn page_request(&self) -> Result<PageRequest> {
        let direction = match self.sort_direction.as_deref() {
            None => SortDirection::default(),
            Some(raw) if raw.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(raw) if raw.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "unknown sort direction '{}'",
                    other
                )))
            }
        };

        Ok(PageRequest::new(
            self.page.unwrap_or(0),
            self.size.unwrap_or(PageRequest::DEFAULT_SIZE),
            direction,
        ))
    }
}

/// GET /api/v1/consumer/messages
pub async fn query_messages(
    state: web::Data<AppState>,
    query: web::Query<MessageQuery>,
) -> Result<HttpResponse> {
    let filter = query.filter()?;
    let page = query.page_request()?;

    let result = state.processor.repository().query(&filter, &page).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/consumer/messages/recent
pub async fn recent_messages(state: web::Data<AppState>) -> Result<HttpResponse> {
    let records = state.processor.repository().find_recent(RECENT_LIMIT).await?;
    Ok(HttpResponse::Ok().json(records))
}

/// GET /api/v1/consumer/messages/{message_id}
pub async fn message_by_id(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let message_id = path.into_inner();
    match state
        .processor
        .repository()
        .find_by_message_id(&message_id)
        .await?
    {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Err(AppError::NotFound(format!("message {}", message_id))),
    }
}
