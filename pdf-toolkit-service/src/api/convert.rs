//! Format conversion endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_WRITE};
use crate::error::ServiceResult;
use crate::operation::{Operation, OperationResult};

use super::{ApiJson, AppState, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/to-images", post(to_images_handler))
        .route("/to-text", post(to_text_handler))
        .route("/to-html", post(to_html_handler))
        .route("/to-markdown", post(to_markdown_handler))
        .route("/to-office", post(to_office_handler))
        .route("/from-images", post(from_images_handler))
        .route("/from-html", post(from_html_handler))
        .route("/from-markdown", post(from_markdown_handler))
        .route("/image", post(image_handler))
}

single_file_handler!(to_images_handler, Operation::ConvertToImages);
single_file_handler!(to_text_handler, Operation::ConvertToText);
single_file_handler!(to_html_handler, Operation::ConvertToHtml);
single_file_handler!(to_markdown_handler, Operation::ConvertToMarkdown);

#[derive(Debug, Deserialize)]
pub struct ToOfficeRequest {
    pub file_id: String,
    pub target_format: String,
}

pub async fn to_office_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ToOfficeRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .to_office(&request.file_id, &request.target_format)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct FromImagesRequest {
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

pub async fn from_images_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<FromImagesRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .images_to_pdf(&request.file_ids, request.output_filename.as_deref())
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct FromHtmlRequest {
    pub html: String,
}

pub async fn from_html_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<FromHtmlRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    Ok(Json(state.service.html_to_pdf(&request.html).await?))
}

#[derive(Debug, Deserialize)]
pub struct FromMarkdownRequest {
    pub markdown: String,
}

pub async fn from_markdown_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<FromMarkdownRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    Ok(Json(state.service.markdown_to_pdf(&request.markdown).await?))
}

#[derive(Debug, Deserialize)]
pub struct ImageConvertRequest {
    pub file_id: String,
    pub output_format: String,
}

pub async fn image_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ImageConvertRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .convert_image(&request.file_id, &request.output_format)
        .await?;
    Ok(Json(result))
}
