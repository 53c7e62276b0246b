//! Orderflow service entry point.
//!
//! Loads configuration, restores the cache from PostgreSQL, spawns the
//! ingest loop over the Kafka topic (or a JSON-lines file when
//! `ORDERFLOW_FEED_PATH` is set) and serves the HTTP API. Ctrl-C or
//! SIGTERM drains the HTTP server and stops the ingest loop between
//! messages.

use std::path::Path;
use std::sync::Arc;

use orderflow_api::{
    create_api_router, init_tracing, ApiError, ApiResult, AppState, DbClient, MeteredStore,
    OrderReader, ServiceConfig, ServiceMetrics,
};
use orderflow_ingest::{run_ingest_loop, JsonLinesFeed, KafkaFeed, MessageFeed, MessageIngestor};
use orderflow_storage::{bootstrap_cache, OrderCache, OrderStore, SharedLruCache};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;

type FeedReader = Box<dyn AsyncBufRead + Unpin + Send>;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ServiceConfig::from_env();
    init_tracing(&config.telemetry)?;
    config.validate()?;

    let metrics = Arc::new(ServiceMetrics::new()?);

    let db = DbClient::from_config(&config.db)?;
    if let Err(e) = db.migrate().await {
        tracing::error!(error = %e, "Schema migration failed, continuing without a reachable store");
    }

    let store: Arc<dyn OrderStore> = Arc::new(MeteredStore::new(db, Arc::clone(&metrics)));
    let cache: Arc<dyn OrderCache> = Arc::new(SharedLruCache::new(config.cache.capacity));

    // The cache is warm before the listener accepts its first request.
    bootstrap_cache(&*store, &*cache, config.cache.store_timeout).await;

    let ingestor = Arc::new(MessageIngestor::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.ingest.clone(),
    ));
    let ingest_stats = ingestor.stats();
    let feed = open_feed(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest_handle = tokio::spawn(run_ingest_loop(feed, ingestor, shutdown_rx));

    let reader = Arc::new(OrderReader::new(store, cache, config.cache.store_timeout));
    let state = AppState::new(reader, ingest_stats, metrics);
    let app = create_api_router(state, &config.api);

    let addr = config.api.socket_addr();
    tracing::info!(%addr, "Starting Orderflow API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)));

    let _ = shutdown_tx.send(true);
    match ingest_handle.await {
        Ok(stats) => tracing::info!(
            stored = stats.stored,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            dropped = stats.dropped,
            failed = stats.failed,
            "Ingest loop drained"
        ),
        Err(e) => tracing::error!(error = %e, "Ingest loop task failed"),
    }

    served
}

async fn open_feed(config: &ServiceConfig) -> ApiResult<Box<dyn MessageFeed>> {
    match config.feed_path.as_deref() {
        Some(path) => Ok(Box::new(open_json_lines(path).await?)),
        None => {
            let feed = KafkaFeed::connect(&config.kafka).map_err(|e| {
                ApiError::internal_error(format!("Failed to create Kafka consumer: {}", e))
            })?;
            Ok(Box::new(feed))
        }
    }
}

async fn open_json_lines(path: &Path) -> ApiResult<JsonLinesFeed<FeedReader>> {
    let reader: FeedReader = if path == Path::new("-") {
        tracing::info!("Reading orders from stdin");
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            ApiError::internal_error(format!("Failed to open feed {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "Reading orders from file");
        Box::new(BufReader::new(file))
    };
    Ok(JsonLinesFeed::new(reader))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
