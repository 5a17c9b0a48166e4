use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use consumer_service::config::ConsumerConfig;
use consumer_service::consumers::RelayMessageConsumer;
use consumer_service::{db, handlers, AppState};
use cross_account_auth::{establish_cross_account_access, StsCredentialProvider};
use delivery_metrics::MetricsAggregator;
use idempotent_consumer::{run_migrations, DeduplicatingProcessor, SqlxConsumedMessageRepository};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,actix_web=info,consumer_service=debug,idempotent_consumer=debug".into()
    });
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

    tracing::info!("Starting consumer-service");

    let config = ConsumerConfig::from_env().context("Invalid consumer configuration")?;

    let credentials = StsCredentialProvider::new();
    establish_cross_account_access(&credentials, config.cross_account.as_ref())
        .await
        .context("Failed to establish cross-account access")?;

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repository = Arc::new(SqlxConsumedMessageRepository::new(pool));
    let metrics = Arc::new(MetricsAggregator::registered_or_plain(
        "consumer",
        prometheus::default_registry(),
    ));
    let processor = Arc::new(DeduplicatingProcessor::new(repository, metrics));

    let consumer = RelayMessageConsumer::new(&config, Arc::clone(&processor))
        .context("Failed to create Kafka consumer")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    let state = web::Data::new(AppState {
        processor,
        consumer_group: config.group_id.clone(),
        admin_token: config.admin_token.clone(),
    });

    tracing::info!(
        host = %config.http.host,
        port = config.http.port,
        topic = %config.kafka.topic,
        group = %config.group_id,
        concurrency = config.concurrency,
        "HTTP server listening"
    );

    // returns once the server has handled Ctrl-C
    let served = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((config.http.host.as_str(), config.http.port))
    .context("Failed to bind HTTP server")?
    .run()
    .await;

    tracing::info!("Stopping Kafka consumer");
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_handle.await {
        tracing::error!(error = %e, "Consumer task terminated abnormally");
    }

    served.context("HTTP server error")?;
    tracing::info!("consumer-service stopped");
    Ok(())
}
