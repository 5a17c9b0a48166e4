pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod handlers;

use idempotent_consumer::DeduplicatingProcessor;
use std::sync::Arc;

/// Shared state behind every HTTP handler
pub struct AppState {
    /// Same processor the partition workers use; its repository and
    /// counters back the read endpoints
    pub processor: Arc<DeduplicatingProcessor>,
    pub consumer_group: String,
    pub admin_token: Option<String>,
}
