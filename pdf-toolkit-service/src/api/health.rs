//! Health endpoints.
//!
//! `/health` is a cheap liveness check. `/health/detailed` reports each
//! dependency and `/health/ready` answers 503 until storage and the database
//! are usable. An enabled but unreachable Ollama only degrades the service.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cache::CacheStats;

use super::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .route("/health/ready", get(readiness_handler))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub upload_dir: bool,
    pub output_dir: bool,
}

impl StorageHealth {
    fn ok(&self) -> bool {
        self.upload_dir && self.output_dir
    }
}

#[derive(Debug, Serialize)]
pub struct BatchHealth {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub active_jobs: usize,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub storage: StorageHealth,
    pub database: bool,
    pub ollama: Value,
    pub ocr_backend: Option<&'static str>,
    pub batch: BatchHealth,
    pub cache: Option<CacheStats>,
    pub websocket_connections: usize,
    pub chat_sessions: usize,
    pub config: Value,
}

fn storage_health(state: &AppState) -> StorageHealth {
    StorageHealth {
        upload_dir: state.service.files.upload_dir().is_dir(),
        output_dir: state.service.files.output_dir().is_dir(),
    }
}

fn database_ok(state: &AppState) -> bool {
    state.service.db.get_all_settings().is_ok()
}

async fn detailed_health_handler(
    State(state): State<Arc<AppState>>,
) -> Json<DetailedHealthResponse> {
    let service = &state.service;
    let storage = storage_health(&state);
    let database = database_ok(&state);
    let ollama_enabled = service.ollama.is_enabled();
    let ollama_available = service.ollama.health_check().await;
    let models = if ollama_available {
        service.ollama.list_models().await.unwrap_or_default()
    } else {
        Vec::new()
    };

    let status = if !storage.ok() || !database {
        "unhealthy"
    } else if ollama_enabled && !ollama_available {
        "degraded"
    } else {
        "healthy"
    };

    let dynamic = service.runtime_config.dynamic();
    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        storage,
        database,
        ollama: json!({
            "enabled": ollama_enabled,
            "available": ollama_available,
            "model": dynamic.ollama.default_model,
            "installed_models": models,
        }),
        ocr_backend: service.ocr.backend().map(|b| b.as_str()),
        batch: BatchHealth {
            queue_depth: service.scheduler.queue_depth(),
            queue_capacity: service.scheduler.queue_capacity(),
            active_jobs: service.scheduler.active_jobs(),
        },
        cache: service.cache.stats().ok(),
        websocket_connections: service.ws_manager.connection_count(),
        chat_sessions: service.ai.active_sessions(),
        config: json!({
            "max_upload_size_bytes": dynamic.limits.max_upload_size_bytes,
            "max_concurrent_jobs": dynamic.batch.max_concurrent_jobs,
            "max_workers_per_job": dynamic.batch.max_workers_per_job,
            "cache_enabled": dynamic.cache.enabled,
        }),
    })
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let storage = storage_health(&state);
    let database = database_ok(&state);
    let ready = storage.ok() && database;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "storage": storage,
            "database": database,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_health_is_public() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
    }

    #[tokio::test]
    async fn test_detailed_health_with_ollama_disabled() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/health/detailed", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["database"], json!(true));
        assert_eq!(body["ollama"]["enabled"], json!(false));
        assert_eq!(body["batch"]["queue_depth"], json!(0));
        assert_eq!(body["websocket_connections"], json!(0));
    }

    #[tokio::test]
    async fn test_readiness_fails_without_storage() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], json!(true));

        std::fs::remove_dir_all(app.service.files.output_dir()).unwrap();
        let (status, body) = app.get("/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["storage"]["output_dir"], json!(false));
    }
}
