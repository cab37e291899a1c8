use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod ai;
mod api;
mod auth;
mod batch;
mod cache;
mod config;
mod convert;
mod db;
mod error;
mod files;
mod hash;
mod ocr;
mod ollama;
mod operation;
mod pdf;
mod service;
mod websocket;

use crate::config::{RuntimeConfig, load_static_config};
use crate::db::Database;
use crate::service::PdfToolkitService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting PDF toolkit service v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Static configuration decides where the database lives
    let static_config = load_static_config()?;
    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        data_dir = %static_config.storage.data_dir.display(),
        "Static configuration loaded"
    );

    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    let db_path = static_config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!("Runtime configuration loaded with DB settings");

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let service = Arc::new(PdfToolkitService::new(db, runtime_config.clone()).await?);

    // Dispatchers pick up jobs left pending or running by a previous process
    let restored = service.start_batch().await?;
    if restored > 0 {
        info!(restored, "Re-queued unfinished batch jobs");
    }

    let cleanup_service = service.clone();
    let cleanup_interval = runtime_config.dynamic().batch.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match cleanup_service.cleanup() {
                Ok(report) if report.total() > 0 => {
                    info!(
                        jobs = report.jobs,
                        cache_entries = report.cache_entries,
                        tokens = report.tokens,
                        chat_sessions = report.chat_sessions,
                        output_files = report.output_files,
                        work_dirs = report.work_dirs,
                        "Cleanup removed expired data"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Cleanup failed");
                }
                _ => {}
            }
        }
    });

    let app = api::router(service.clone(), metrics);

    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.scheduler.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // RUST_LOG wins over the crate default
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pdf_toolkit_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
