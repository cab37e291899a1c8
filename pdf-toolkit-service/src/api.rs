//! HTTP API for the PDF toolkit service.
//!
//! This module provides the REST API endpoints for:
//! - Service info, health and Prometheus metrics
//! - Authentication and users
//! - File upload, download and deletion
//! - Page operations, extraction, conversion, security and optimization
//! - AI document analysis and chat
//! - Batch jobs and saved configurations, with a WebSocket for progress
//! - Runtime settings

use axum::{
    Json, Router,
    extract::{
        FromRequest, Query, State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthService, AuthState, AuthUser, SCOPE_READ};
use crate::error::{ServiceError, ServiceResult};
use crate::operation::{Operation, OperationResult};
use crate::service::PdfToolkitService;
use crate::websocket::handle_ws_connection;

pub mod ai;
pub mod auth;
pub mod batch;
pub mod convert;
pub mod extract;
pub mod files;
pub mod health;
mod layers;
pub mod optimize;
pub mod pdf;
pub mod security;
pub mod settings;

/// Application state
pub struct AppState {
    pub service: Arc<PdfToolkitService>,
    pub start_time: Instant,
    pub metrics: PrometheusHandle,
}

impl AuthState for Arc<AppState> {
    fn auth_service(&self) -> &AuthService {
        &self.service.auth
    }
}

/// `Json` whose rejections use the service error body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::invalid(rejection.body_text())
    }
}

/// Body of single-file operation endpoints: `file_id` plus the operation's
/// parameters at the top level
#[derive(Debug, Deserialize)]
pub struct FileOperationRequest {
    pub file_id: String,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

/// Run `operation` for an authenticated caller holding `scope`
pub(crate) async fn run_operation(
    state: &AppState,
    user: &AuthUser,
    scope: &str,
    operation: Operation,
    file_ids: Vec<String>,
    parameters: Map<String, Value>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(scope)?;
    let result = state
        .service
        .run_operation(operation, &file_ids, &Value::Object(parameters), None)
        .await?;
    Ok(Json(result))
}

/// Define a POST handler that runs `$operation` on the body's `file_id`
macro_rules! single_file_handler {
    ($name:ident, $operation:expr) => {
        pub async fn $name(
            axum::extract::State(state): axum::extract::State<std::sync::Arc<$crate::api::AppState>>,
            user: $crate::auth::AuthUser,
            $crate::api::ApiJson(request): $crate::api::ApiJson<$crate::api::FileOperationRequest>,
        ) -> $crate::error::ServiceResult<axum::Json<$crate::operation::OperationResult>> {
            $crate::api::run_operation(
                &state,
                &user,
                $crate::auth::SCOPE_WRITE,
                $operation,
                vec![request.file_id],
                request.parameters,
            )
            .await
        }
    };
}
pub(crate) use single_file_handler;

/// Build the API router
pub fn router(service: Arc<PdfToolkitService>, metrics: PrometheusHandle) -> Router {
    let limits = service.runtime_config.dynamic().limits.clone();

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .nest("/auth", auth::routes())
        .nest("/files", files::routes(limits.max_upload_size_bytes as usize))
        .nest("/pdf", pdf::routes())
        .nest("/extract", extract::routes())
        .nest("/ai", ai::routes())
        .nest("/convert", convert::routes())
        .nest("/security", security::routes())
        .nest("/optimize", optimize::routes())
        .nest("/batch", batch::routes())
        .nest("/settings", settings::routes());

    Router::new()
        .route("/", get(root_handler))
        .merge(health::routes())
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/batch/ws", get(ws_handler))
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(limits.request_timeout()))
        .layer(middleware::from_fn(layers::security_headers))
        .layer(middleware::from_fn(layers::process_time))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "docs": {
            "health": "/health",
            "metrics": "/metrics",
            "api": "/api/v1",
            "batch_progress": "/api/v1/batch/ws",
        },
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// === WebSocket ===

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ServiceResult<impl IntoResponse> {
    let token = params.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    });
    let token = token.ok_or_else(|| ServiceError::Unauthorized {
        message: "Not authenticated".to_string(),
    })?;
    let user = state.service.auth.validate(&token)?;
    user.require_scope(SCOPE_READ)?;

    let ws = ws.map_err(|e| ServiceError::invalid(e.body_text()))?;
    info!(username = %user.username, "WebSocket upgrade request received");
    let ws_manager = state.service.ws_manager.clone();
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, ws_manager, user.username)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{DynamicConfig, test_config};
    use crate::db::Database;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub struct TestApp {
        pub dir: TempDir,
        pub service: Arc<PdfToolkitService>,
        pub router: Router,
    }

    impl TestApp {
        pub async fn new() -> Self {
            Self::with_config(|_| {}).await
        }

        /// Adjust the dynamic config before the service is built
        pub async fn with_config(configure: impl FnOnce(&mut DynamicConfig)) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(Database::open_in_memory().unwrap());
            let runtime_config = Arc::new(test_config(dir.path()));
            let mut dynamic = (**runtime_config.dynamic()).clone();
            configure(&mut dynamic);
            runtime_config.update_dynamic(dynamic);
            let service = Arc::new(PdfToolkitService::new(db, runtime_config).await.unwrap());
            let handle = PrometheusBuilder::new().build_recorder().handle();
            let router = router(service.clone(), handle);
            Self {
                dir,
                service,
                router,
            }
        }

        /// Same as `new` with batch dispatchers running
        pub async fn with_batch() -> Self {
            let app = Self::new().await;
            app.service.start_batch().await.unwrap();
            app
        }

        pub fn token(&self, username: &str, password: &str) -> String {
            self.service
                .auth
                .issue_token(username, password, None)
                .unwrap()
                .access_token
        }

        pub fn admin_token(&self) -> String {
            self.token("admin", "adminpassword")
        }

        /// Upload a generated PDF straight through the file manager
        pub fn upload_pdf(&self, name: &str, pages: usize) -> String {
            let path = crate::pdf::testing::sample_pdf(self.dir.path(), name, pages);
            let bytes = std::fs::read(path).unwrap();
            self.service.files.save_upload(&bytes, name).unwrap().id
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, headers, body)
        }

        pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
            let mut builder = Request::builder().uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let (status, _, body) = self.send(builder.body(Body::empty()).unwrap()).await;
            (status, body)
        }

        pub async fn post_json(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
            self.json_request("POST", uri, token, body).await
        }

        pub async fn json_request(
            &self,
            method: &str,
            uri: &str,
            token: &str,
            body: Value,
        ) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            let (status, _, body) = self.send(request).await;
            (status, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestApp;
    use super::*;

    #[tokio::test]
    async fn test_root_and_metrics_are_public() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], json!("pdf-toolkit-service"));

        let (status, _) = app.get("/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_security_headers_and_process_time() {
        let app = TestApp::new().await;
        let request = axum::http::Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let (_, headers, _) = app.send(request).await;

        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert!(headers.contains_key("strict-transport-security"));
        assert!(headers.contains_key("content-security-policy"));
        let elapsed: f64 = headers["x-process-time"].to_str().unwrap().parse().unwrap();
        assert!(elapsed >= 0.0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_request() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let (status, body) = app
            .post_json("/api/v1/pdf/rotate", &token, json!({"page_rotations": {}}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("invalid_request"));
    }

    #[tokio::test]
    async fn test_websocket_requires_token() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/v1/batch/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
