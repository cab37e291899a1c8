//! Content extraction endpoints.

use axum::{Router, routing::post};
use std::sync::Arc;

use crate::operation::Operation;

use super::{AppState, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/text", post(text_handler))
        .route("/images", post(images_handler))
        .route("/tables", post(tables_handler))
        .route("/metadata", post(metadata_handler))
        .route("/links", post(links_handler))
        .route("/ocr", post(ocr_handler))
}

single_file_handler!(text_handler, Operation::ExtractText);
single_file_handler!(images_handler, Operation::ExtractImages);
single_file_handler!(tables_handler, Operation::ExtractTables);
single_file_handler!(metadata_handler, Operation::ExtractMetadata);
single_file_handler!(links_handler, Operation::ExtractLinks);
single_file_handler!(ocr_handler, Operation::Ocr);

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_extract_text_then_cached() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 2);

        let (status, body) = app
            .post_json("/api/v1/extract/text", &token, json!({"file_id": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["pages"], json!(2));
        assert_eq!(body["output_files"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .post_json("/api/v1/extract/text", &token, json!({"file_id": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cached"], json!(true));
    }

    #[tokio::test]
    async fn test_extract_links_and_metadata() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 1);

        let (status, body) = app
            .post_json("/api/v1/extract/links", &token, json!({"file_id": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], json!(0));

        let (status, body) = app
            .post_json("/api/v1/extract/metadata", &token, json!({"file_id": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let (status, body) = app
            .post_json("/api/v1/extract/tables", &token, json!({"file_id": "missing"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("file_not_found"));
    }
}
