use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use cross_account_auth::{establish_cross_account_access, StsCredentialProvider};
use delivery_metrics::MetricsAggregator;
use producer_service::config::ProducerConfig;
use producer_service::handlers;
use producer_service::services::{BatchCoordinator, KafkaBrokerSender, Publisher, RateLimiter};
use producer_service::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,producer_service=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    config_core::load_dotenv();
    init_tracing();

    tracing::info!("Starting producer-service");

    let config = ProducerConfig::from_env().context("Invalid producer configuration")?;

    // credentials must be in place before the broker client is created
    let credentials = StsCredentialProvider::new();
    establish_cross_account_access(&credentials, config.cross_account.as_ref())
        .await
        .context("Failed to establish cross-account access")?;

    let sender = KafkaBrokerSender::new(&config.producer_client_config(), &config.kafka.topic)
        .context("Failed to create Kafka producer")?;

    let metrics = Arc::new(MetricsAggregator::registered_or_plain(
        "producer",
        prometheus::default_registry(),
    ));
    let publisher = Publisher::new(Arc::new(sender), metrics);
    let rate_limiter = RateLimiter::new(config.rate_limit_per_second)?;
    let coordinator =
        BatchCoordinator::new(publisher.clone(), rate_limiter, config.kafka.topic.clone());

    let state = web::Data::new(AppState {
        coordinator,
        max_batch_size: config.max_batch_size,
    });

    tracing::info!(
        host = %config.http.host,
        port = config.http.port,
        topic = %config.kafka.topic,
        rate_limit_per_second = config.rate_limit_per_second,
        "HTTP server listening"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((config.http.host.as_str(), config.http.port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")?;

    tracing::info!("Flushing in-flight messages");
    if let Err(e) = publisher.flush(Duration::from_secs(10)) {
        tracing::warn!(error = %e, "Producer flush incomplete");
    }

    tracing::info!("producer-service stopped");
    Ok(())
}
