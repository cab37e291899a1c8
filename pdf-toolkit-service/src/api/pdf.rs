//! Page operation endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_READ, SCOPE_WRITE};
use crate::error::ServiceResult;
use crate::operation::{Operation, OperationResult};
use crate::pdf::PdfInfo;

use super::{ApiJson, AppState, run_operation, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/merge", post(merge_handler))
        .route("/split", post(split_handler))
        .route("/rotate", post(rotate_handler))
        .route("/extract-pages", post(extract_pages_handler))
        .route("/reorder-pages", post(reorder_pages_handler))
        .route("/info/{file_id}", get(info_handler))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub file_ids: Vec<String>,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

pub async fn merge_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<MergeRequest>,
) -> ServiceResult<Json<OperationResult>> {
    run_operation(
        &state,
        &user,
        SCOPE_WRITE,
        Operation::Merge,
        request.file_ids,
        request.parameters,
    )
    .await
}

single_file_handler!(split_handler, Operation::Split);
single_file_handler!(rotate_handler, Operation::Rotate);
single_file_handler!(extract_pages_handler, Operation::ExtractPages);
single_file_handler!(reorder_pages_handler, Operation::ReorderPages);

pub async fn info_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> ServiceResult<Json<PdfInfo>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.pdf_info(&file_id).await?))
}
