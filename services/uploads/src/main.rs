use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_service::api::local_hostname;
use upload_service::startup::connect_with_backoff;
use upload_service::{
    start_api_server, AppState, Config, KafkaNotifier, MetadataStore, PgMetadataStore,
    PipelineSettings, RandomShortIds, RetrievalResolver, S3ObjectStore, UploadNotifier,
    UploadPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting upload service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let metadata_store = Arc::new(
        connect_with_backoff("postgres", &config.startup, || {
            PgMetadataStore::new(&config.database)
        })
        .await
        .context("Failed to initialize metadata store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(S3ObjectStore::new(&config.s3).await);
    connect_with_backoff("s3", &config.startup, || object_store.probe())
        .await
        .context("Failed to reach S3 bucket")?;

    let settings = PipelineSettings::from_config(&config);
    let mut pipeline = UploadPipeline::new(
        object_store.clone(),
        metadata_store.clone(),
        Arc::new(RandomShortIds::new(config.uploads.short_id_bytes)),
        settings.clone(),
    );

    if let Some(events) = &config.events {
        match KafkaNotifier::new(events) {
            Ok(notifier) => {
                let notifier: Arc<dyn UploadNotifier> = Arc::new(notifier);
                pipeline = pipeline.with_notifier(notifier);
            }
            Err(e) => warn!(error = %e, "Upload events disabled"),
        }
    }

    let resolver = RetrievalResolver::new(
        object_store.clone(),
        metadata_store.clone(),
        settings.signed_url_ttl,
        settings.store_timeout,
    );

    let shutdown = CancellationToken::new();
    let metadata_store: Arc<dyn MetadataStore> = metadata_store;

    let api_state = AppState {
        pipeline: Arc::new(pipeline),
        resolver: Arc::new(resolver),
        metadata_store,
        shutdown: shutdown.clone(),
        hostname: Arc::from(local_hostname()),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Upload service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down upload service");

    // In-flight uploads observe child tokens of this one
    shutdown.cancel();

    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed");
    }

    info!("Upload service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
