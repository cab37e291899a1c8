//! Encryption, permission and watermark endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_READ};
use crate::error::ServiceResult;
use crate::operation::Operation;

use super::{AppState, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/add-password", post(add_password_handler))
        .route("/remove-password", post(remove_password_handler))
        .route("/set-permissions", post(set_permissions_handler))
        .route("/add-watermark", post(add_watermark_handler))
        .route("/info/{file_id}", get(security_info_handler))
}

single_file_handler!(add_password_handler, Operation::AddPassword);
single_file_handler!(remove_password_handler, Operation::RemovePassword);
single_file_handler!(set_permissions_handler, Operation::SetPermissions);
single_file_handler!(add_watermark_handler, Operation::AddWatermark);

#[derive(Debug, Deserialize)]
pub struct SecurityInfoParams {
    pub password: Option<String>,
}

pub async fn security_info_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(file_id): Path<String>,
    Query(params): Query<SecurityInfoParams>,
) -> ServiceResult<Json<Value>> {
    user.require_scope(SCOPE_READ)?;
    let info = state
        .service
        .security_info(&file_id, params.password)
        .await?;
    Ok(Json(info))
}
