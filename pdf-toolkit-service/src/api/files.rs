//! File API endpoints.
//!
//! Upload, listing, download and deletion of managed files. Every other
//! endpoint refers to files by the ids handed out here.

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_READ, SCOPE_WRITE};
use crate::db::{FileKind, FileRecord};
use crate::error::{ProcessingError, ServiceError, ServiceResult};

use super::AppState;

pub fn routes(max_upload_size: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/", get(list_files_handler))
        .route("/{id}", get(get_file_handler).delete(delete_file_handler))
        .route("/{id}/download", get(download_handler))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub count: usize,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    pub kind: Option<FileKind>,
}

/// Response for delete operations
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> ServiceError {
    ServiceError::invalid(error.body_text())
}

/// Upload one or more files in repeated `file` fields
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ServiceResult<Json<UploadResponse>> {
    user.require_scope(SCOPE_WRITE)?;

    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        files.push(state.service.files.save_upload(&data, &filename)?);
    }

    if files.is_empty() {
        return Err(ServiceError::invalid("No file provided"));
    }
    Ok(Json(UploadResponse {
        success: true,
        count: files.len(),
        files,
    }))
}

pub async fn list_files_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ListFilesParams>,
) -> ServiceResult<Json<Vec<FileRecord>>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.files.list(params.kind)?))
}

pub async fn get_file_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<FileRecord>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.files.get(&id)?))
}

pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Response> {
    user.require_scope(SCOPE_READ)?;
    let record = state.service.files.get(&id)?;
    let path = state.service.files.path(&id)?;
    let data = tokio::fs::read(&path)
        .await
        .map_err(ProcessingError::Io)?;

    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        record.original_name.replace('"', ""),
        urlencoding::encode(&record.original_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, record.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(data),
    )
        .into_response())
}

pub async fn delete_file_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ServiceResult<Json<DeleteResponse>> {
    user.require_scope(SCOPE_WRITE)?;
    state.service.files.delete(&id)?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("File {} deleted", id),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::json;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, filename, content) in parts {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, field, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(token: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/files/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let pdf = std::fs::read(crate::pdf::testing::sample_pdf(app.dir.path(), "in.pdf", 1)).unwrap();

        let body = multipart_body(&[("file", "report.pdf", pdf.as_slice()), ("file", "notes.txt", &b"hello"[..])]);
        let (status, _, body) = app.send(upload_request(&token, body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], json!(2));
        let id = body["files"][0]["file_id"].as_str().unwrap().to_string();
        assert_eq!(body["files"][0]["filename"], json!("report.pdf"));

        let (status, body) = app.get("/api/v1/files?kind=upload", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let request = Request::builder()
            .uri(format!("/api/v1/files/{}/download", id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app.router.clone(), request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), pdf.as_slice());

        let (status, _) = app
            .json_request("DELETE", &format!("/api/v1/files/{}", id), &token, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = app.get(&format!("/api/v1/files/{}", id), Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("file_not_found"));
    }

    #[tokio::test]
    async fn test_upload_rejects_disallowed_extension() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let body = multipart_body(&[("file", "tool.exe", &b"MZ"[..])]);
        let (status, _, _) = app.send(upload_request(&token, body)).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_upload_needs_write_scope() {
        let app = TestApp::new().await;
        let token = app.token("user", "userpassword");
        let body = multipart_body(&[("file", "a.txt", &b"hi"[..])]);
        let (status, _, _) = app.send(upload_request(&token, body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let body = multipart_body(&[("other", "a.txt", &b"hi"[..])]);
        let (status, _, _) = app.send(upload_request(&token, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
