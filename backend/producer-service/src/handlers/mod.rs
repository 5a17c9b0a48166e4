pub mod metrics;
pub mod produce;

use actix_web::web;

/// Mount the `/api/v1` producer routes and the Prometheus scrape endpoint
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/produce", web::post().to(produce::produce_messages))
            .route("/test/batch", web::post().to(produce::batch_test))
            .route("/metrics", web::get().to(metrics::producer_metrics))
            .route("/health", web::get().to(metrics::health)),
    )
    .route("/metrics", web::get().to(metrics::serve_metrics));
}
