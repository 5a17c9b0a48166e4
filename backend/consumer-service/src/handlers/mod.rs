pub mod messages;
pub mod status;

use actix_web::web;

/// Mount the `/api/v1/consumer` routes and the Prometheus scrape endpoint
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/consumer")
            .route("/status", web::get().to(status::consumer_status))
            .route("/metrics", web::get().to(status::consumer_metrics))
            .route("/reset", web::post().to(status::reset_offsets))
            .route("/health", web::get().to(status::health))
            .route("/messages", web::get().to(messages::query_messages))
            .route("/messages/recent", web::get().to(messages::recent_messages))
            .route("/messages/{message_id}", web::get().to(messages::message_by_id)),
    )
    .route("/metrics", web::get().to(status::serve_metrics));
}
