pub mod config;
pub mod error;
pub mod handlers;
pub mod services;

use services::BatchCoordinator;

/// Shared state behind every HTTP handler
pub struct AppState {
    pub coordinator: BatchCoordinator,
    /// Requests above this size are rejected before any message is sent
    pub max_batch_size: u32,
}
