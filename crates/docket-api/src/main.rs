//! docket-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docket_api::{router, ApiConfig, AppState, QueueBackend};
use docket_core::{BlobStore, DocumentRepository, QueueStore};
use docket_db::{
    Database, FilesystemBlobStore, MemoryDocumentRepository, MemoryQueueStore, PoolConfig,
};
use docket_inference::OllamaEnrichmentBackend;
use docket_jobs::{JobHandler, JobQueue, OcrDispatcher, QueueOptions, WorkerConfig, WorkerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docket_api=debug,docket_jobs=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docket-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ApiConfig::from_env()?;

    let (store, documents): (Arc<dyn QueueStore>, Arc<dyn DocumentRepository>) =
        match (config.backend, config.database_url.as_deref()) {
            (QueueBackend::Postgres, Some(url)) => {
                let db = Database::connect_with_config(url, PoolConfig::from_env()).await?;
                db.migrate().await?;
                info!(backend = %config.backend, "Connected to database");
                (Arc::new(db.jobs.clone()), Arc::new(db.documents.clone()))
            }
            _ => {
                warn!(backend = %config.backend, "Using in-memory stores; state is lost on restart");
                (
                    Arc::new(MemoryQueueStore::new()),
                    Arc::new(MemoryDocumentRepository::new()),
                )
            }
        };

    let blob_store = FilesystemBlobStore::new(config.storage_root.clone());
    blob_store.validate().await?;
    let blobs: Arc<dyn BlobStore> = Arc::new(blob_store);

    let enrichment = Arc::new(OllamaEnrichmentBackend::from_env()?);
    let dispatcher = Arc::new(OcrDispatcher::with_default_adapters());
    for (strategy, healthy) in dispatcher.health_check_all().await {
        if !healthy {
            warn!(strategy = ?strategy, "Extraction adapter unavailable; documents of this type will fail");
        }
    }

    let queue = JobQueue::new(store, QueueOptions::from_env());
    queue.register_queues().await?;

    let state = AppState::new(queue.clone(), documents, blobs, dispatcher, enrichment);

    let handlers: Vec<Arc<dyn JobHandler>> = vec![
        Arc::new(state.pipeline.clone()),
        Arc::new(state.user_requests.clone()),
        Arc::new(state.ai_analysis.clone()),
    ];
    let workers: Vec<WorkerHandle> = handlers
        .into_iter()
        .map(|handler| {
            let config = WorkerConfig::for_queue(&handler.queue());
            queue.consume_with_config(handler, config)
        })
        .collect();

    let app = router(state, config.max_body_size);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped; draining workers");
    for worker in workers {
        let queue = worker.queue().clone();
        if let Err(e) = worker.shutdown().await {
            warn!(queue = %queue, error = %e, "Worker did not shut down cleanly");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
