//! AI analysis endpoints.
//!
//! Summaries, analysis and classification run as regular operations.
//! Question answering, translation and chat take free-form input and
//! bypass the cache.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ai::ChatSession;
use crate::auth::{AuthUser, SCOPE_READ, SCOPE_WRITE};
use crate::error::ServiceResult;
use crate::operation::{Operation, OperationResult};

use super::{ApiJson, AppState, single_file_handler};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/summarize", post(summarize_handler))
        .route("/analyze", post(analyze_handler))
        .route("/classify", post(classify_handler))
        .route("/question", post(question_handler))
        .route("/translate", post(translate_handler))
        .route("/chat/start", post(start_chat_handler))
        .route("/chat/message", post(chat_message_handler))
        .route("/chat/{session_id}", get(get_session_handler))
}

single_file_handler!(summarize_handler, Operation::Summarize);
single_file_handler!(analyze_handler, Operation::Analyze);
single_file_handler!(classify_handler, Operation::Classify);

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub file_id: String,
    pub question: String,
}

pub async fn question_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<QuestionRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .answer_question(&request.file_id, &request.question)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub file_id: String,
    pub target_language: String,
    #[serde(default = "default_true")]
    pub preserve_formatting: bool,
}

fn default_true() -> bool {
    true
}

pub async fn translate_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<TranslateRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .translate(
            &request.file_id,
            &request.target_language,
            request.preserve_formatting,
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct StartChatRequest {
    pub file_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartChatResponse {
    pub session_id: String,
    pub file_id: String,
}

pub async fn start_chat_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<StartChatRequest>,
) -> ServiceResult<Json<StartChatResponse>> {
    user.require_scope(SCOPE_WRITE)?;
    let session = state.service.start_chat(&request.file_id).await?;
    Ok(Json(StartChatResponse {
        session_id: session.id,
        file_id: session.file_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub session_id: String,
    pub message: String,
}

pub async fn chat_message_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ChatMessageRequest>,
) -> ServiceResult<Json<OperationResult>> {
    user.require_scope(SCOPE_WRITE)?;
    let result = state
        .service
        .chat(&request.session_id, &request.message)
        .await?;
    Ok(Json(result))
}

/// Session with its full history
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> ServiceResult<Json<ChatSession>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.ai.session(&session_id)?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_summarize_falls_back_to_heuristics() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 3);

        let (status, body) = app
            .post_json(
                "/api/v1/ai/summarize",
                &token,
                json!({"file_id": id, "summary_length": 50}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["engine"], json!("heuristic"));
    }

    #[tokio::test]
    async fn test_question_and_translate() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 2);

        let (status, body) = app
            .post_json(
                "/api/v1/ai/question",
                &token,
                json!({"file_id": id, "question": "Which page comes second?"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["question"], json!("Which page comes second?"));

        let (status, body) = app
            .post_json(
                "/api/v1/ai/translate",
                &token,
                json!({"file_id": id, "target_language": "Spanish"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["target_language"], json!("Spanish"));
    }

    #[tokio::test]
    async fn test_chat_session_flow() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let id = app.upload_pdf("a.pdf", 1);

        let (status, body) = app
            .post_json("/api/v1/ai/chat/start", &token, json!({"file_id": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = app
            .post_json(
                "/api/v1/ai/chat/message",
                &token,
                json!({"session_id": session_id, "message": "What is on page 1?"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["turns"], json!(2));

        let (status, body) = app
            .get(&format!("/api/v1/ai/chat/{}", session_id), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file_id"], json!(id));

        let (status, _) = app
            .post_json(
                "/api/v1/ai/chat/message",
                &token,
                json!({"session_id": "nope", "message": "hi"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
