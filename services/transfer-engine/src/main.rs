use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use ledger_core::{GrpcLedgerClient, LedgerClient};
use message_bus::{jetstream, BatchAccumulator, JetStreamPublisher, JetStreamSource, PublisherConfig};
use settlement::{
    ensure_company_accounts, CurrencyCache, MetadataStore, TransferPipeline, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use transfer_engine::{config::Config, database::PgMetadataStore, handlers};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();

    info!("🚀 Starting Transfer Engine...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Configuration loaded successfully");

    // Ledger cluster
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        GrpcLedgerClient::connect(&config.ledger).context("Failed to configure ledger client")?,
    );

    // Metadata store
    let pg = PgMetadataStore::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("Failed to connect to database")?;
    pg.migrate().await.context("Failed to apply migrations")?;
    let store: Arc<dyn MetadataStore> = Arc::new(pg);

    info!("Database connected successfully");

    let created = ensure_company_accounts(ledger.as_ref(), store.as_ref())
        .await
        .context("Failed to verify company accounts")?;
    info!("✅ Company accounts verified ({} created)", created);

    let cache = Arc::new(CurrencyCache::new(store.clone(), config.pipeline.cache_ttl()));

    // Queue
    let context = jetstream::connect(&config.queue.url)
        .await
        .context("Failed to connect to NATS")?;
    jetstream::ensure_stream(&context, &config.queue)
        .await
        .context("Failed to prepare the movement stream")?;
    let source = Arc::new(
        JetStreamSource::subscribe(&context, &config.queue)
            .await
            .context("Failed to join the consumer group")?,
    );
    let publisher = Arc::new(JetStreamPublisher::new(
        context,
        config.queue.subject.clone(),
        PublisherConfig::default(),
    ));

    info!("✅ NATS JetStream consumer '{}' ready", config.queue.group_id);

    // Settlement pipeline
    let notifier = Arc::new(
        WebhookNotifier::new(&config.pipeline.webhook_url, config.pipeline.webhook_timeout())
            .context("Failed to build notification client")?,
    );
    let pipeline = Arc::new(TransferPipeline::new(
        source,
        BatchAccumulator::new(config.queue.batch_size, config.queue.batch_timeout()),
        ledger.clone(),
        store.clone(),
        cache.clone(),
        notifier,
        config.pipeline.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let pipeline_task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(stop_rx).await })
    };

    // Admin HTTP surface
    let server_config = config.server.clone();
    let state = web::Data::new(handlers::AppState::new(ledger, store, cache, publisher));

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .shutdown_timeout(server_config.shutdown_timeout_secs)
    .disable_signals()
    .bind((server_config.host.as_str(), server_config.port))?
    .run();

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested");

    // Let the batch in flight reach its commit decision before the server goes
    let _ = stop_tx.send(true);
    if let Err(e) = pipeline_task.await {
        error!("❌ Pipeline task ended abnormally: {}", e);
    }

    server_handle.stop(true).await;
    match tokio::time::timeout(Duration::from_secs(server_config.shutdown_timeout_secs), server_task).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!("❌ HTTP server error: {}", e),
        Ok(Err(e)) => error!("❌ HTTP server task failed: {}", e),
        Err(_) => error!("❌ HTTP server did not stop within {}s", server_config.shutdown_timeout_secs),
    }

    info!("Transfer Engine stopped");
    Ok(())
}
