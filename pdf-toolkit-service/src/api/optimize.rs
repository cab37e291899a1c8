//! Compression and size analysis endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_READ};
use crate::error::ServiceResult;
use crate::operation::Operation;
use crate::pdf::optimize::SizeAnalysis;

use super::{ApiJson, AppState, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/compress", post(compress_handler))
        .route("/optimize-web", post(optimize_web_handler))
        .route("/analyze/{file_id}", get(analyze_handler))
        .route("/preview", post(preview_handler))
        .route("/compare", post(compare_handler))
}

single_file_handler!(compress_handler, Operation::Compress);
single_file_handler!(optimize_web_handler, Operation::OptimizeWeb);

pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> ServiceResult<Json<SizeAnalysis>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.size_analysis(&file_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub file_id: String,
    pub compression_level: u8,
}

/// Estimated result of one compression level; nothing is written
pub async fn preview_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<PreviewRequest>,
) -> ServiceResult<Json<Value>> {
    user.require_scope(SCOPE_READ)?;
    let preview = state
        .service
        .compression_preview(&request.file_id, request.compression_level)
        .await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub file_id: String,
    #[serde(default)]
    pub levels: Option<Vec<u8>>,
}

pub async fn compare_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CompareRequest>,
) -> ServiceResult<Json<Value>> {
    user.require_scope(SCOPE_READ)?;
    let comparison = state
        .service
        .compression_comparison(&request.file_id, request.levels)
        .await?;
    Ok(Json(comparison))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_analyze_preview_and_compare() {
        let app = TestApp::new().await;
        let token = app.token("user", "userpassword");
        let id = app.upload_pdf("a.pdf", 3);

        let (status, body) = app
            .get(&format!("/api/v1/optimize/analyze/{}", id), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page_count"], json!(3));

        let (status, body) = app
            .post_json(
                "/api/v1/optimize/preview",
                &token,
                json!({"file_id": id, "compression_level": 5}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["compression_level"], json!(5));

        let (status, body) = app
            .post_json(
                "/api/v1/optimize/compare",
                &token,
                json!({"file_id": id, "levels": [1, 9]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["comparisons"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compress_validates_level() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 2);

        let (status, _) = app
            .post_json(
                "/api/v1/optimize/compress",
                &token,
                json!({"file_id": id, "compression_level": 8}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post_json(
                "/api/v1/optimize/compress",
                &token,
                json!({"file_id": id, "compression_level": 4}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));

        let (status, _) = app
            .post_json(
                "/api/v1/optimize/preview",
                &token,
                json!({"file_id": id, "compression_level": 12}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
