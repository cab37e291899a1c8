//! Batch job endpoints.
//!
//! Jobs are queued here and run by the scheduler's dispatchers. Progress is
//! pushed over the WebSocket at `/api/v1/batch/ws`; these endpoints serve
//! snapshots, results and reports.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_READ, SCOPE_WRITE};
use crate::batch::{
    BatchConfiguration, BatchJob, BatchOptions, FileOutcome, JobProgress, JobReport,
    JobStatistics, JobStatus,
};
use crate::error::{ServiceError, ServiceResult};
use crate::operation::Operation;

use super::{ApiJson, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler).delete(cancel_job_handler))
        .route("/jobs/{id}/status", get(job_status_handler))
        .route("/jobs/{id}/results", get(job_results_handler))
        .route("/jobs/{id}/statistics", get(job_statistics_handler))
        .route("/jobs/{id}/report", get(job_report_handler))
        .route("/jobs/{id}/retry", post(retry_job_handler))
        .route(
            "/configurations",
            post(save_configuration_handler).get(list_configurations_handler),
        )
        .route("/configurations/{name}", get(get_configuration_handler))
        .route("/configurations/{name}/run", post(run_configuration_handler))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub operation: String,
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub options: BatchOptions,
}

pub async fn create_job_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateJobRequest>,
) -> ServiceResult<(StatusCode, Json<BatchJob>)> {
    user.require_scope(SCOPE_WRITE)?;
    let operation = Operation::parse(&request.operation)?;
    let parameters = match request.parameters {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let job = state.service.scheduler.create_job(
        operation,
        request.file_ids,
        parameters,
        request.options,
    )?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
}

pub async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ListJobsParams>,
) -> ServiceResult<Json<Vec<BatchJob>>> {
    user.require_scope(SCOPE_READ)?;
    let status = params
        .status
        .as_deref()
        .map(|s| {
            JobStatus::from_str(s)
                .ok_or_else(|| ServiceError::invalid(format!("Unknown job status: {}", s)))
        })
        .transpose()?;
    Ok(Json(state.service.scheduler.list_jobs(status)?))
}

pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<BatchJob>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.get_job(&id)?))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

/// Cancelling a finished job is not an error; `cancelled` reports whether
/// anything changed
pub async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<CancelResponse>> {
    user.require_scope(SCOPE_WRITE)?;
    state.service.scheduler.get_job(&id)?;
    let cancelled = state.service.scheduler.cancel_job(&id);
    Ok(Json(CancelResponse {
        job_id: id,
        cancelled,
    }))
}

pub async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<JobProgress>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.job_status(&id)?))
}

pub async fn job_results_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<FileOutcome>>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.results(&id)?))
}

pub async fn job_statistics_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<JobStatistics>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.statistics(&id)?))
}

pub async fn job_report_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<JobReport>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.report(&id)?))
}

pub async fn retry_job_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<(StatusCode, Json<BatchJob>)> {
    user.require_scope(SCOPE_WRITE)?;
    let job = state.service.scheduler.retry_failed(&id)?;
    Ok((StatusCode::CREATED, Json(job)))
}

// === Configurations ===

#[derive(Debug, Deserialize)]
pub struct SaveConfigurationRequest {
    pub name: String,
    pub job_id: String,
}

pub async fn save_configuration_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<SaveConfigurationRequest>,
) -> ServiceResult<(StatusCode, Json<BatchConfiguration>)> {
    user.require_scope(SCOPE_WRITE)?;
    let config = state
        .service
        .scheduler
        .save_configuration(&request.name, &request.job_id)?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn list_configurations_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ServiceResult<Json<Vec<BatchConfiguration>>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.list_configurations()?))
}

pub async fn get_configuration_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(name): Path<String>,
) -> ServiceResult<Json<BatchConfiguration>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.scheduler.load_configuration(&name)?))
}

#[derive(Debug, Deserialize)]
pub struct RunConfigurationRequest {
    pub file_ids: Vec<String>,
}

pub async fn run_configuration_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(name): Path<String>,
    ApiJson(request): ApiJson<RunConfigurationRequest>,
) -> ServiceResult<(StatusCode, Json<BatchJob>)> {
    user.require_scope(SCOPE_WRITE)?;
    let job = state
        .service
        .scheduler
        .create_from_configuration(&name, request.file_ids)?;
    Ok((StatusCode::CREATED, Json(job)))
}
