//! Authentication endpoints.

use axum::{
    Form, Json, Router,
    extract::{FromRequest, Request, State},
    http::header,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_ADMIN, SCOPE_READ, TokenResponse};
use crate::db::UserRecord;
use crate::error::{ServiceError, ServiceResult};

use super::{ApiJson, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/token", post(token_handler))
        .route("/logout", post(logout_handler))
        .route("/users/me", get(me_handler))
        .route("/users/me/scopes", get(my_scopes_handler))
        .route("/admin/users", get(list_users_handler))
}

/// Credentials for POST /auth/token, as a form or JSON
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
    /// Space-separated
    #[serde(default)]
    pub scope: Option<String>,
}

pub async fn token_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ServiceResult<Json<TokenResponse>> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let credentials = if is_form {
        let Form(credentials) = Form::<TokenRequest>::from_request(request, &state)
            .await
            .map_err(|e| ServiceError::invalid(e.body_text()))?;
        credentials
    } else {
        let ApiJson(credentials) = ApiJson::<TokenRequest>::from_request(request, &state).await?;
        credentials
    };

    let token = state.service.auth.issue_token(
        &credentials.username,
        &credentials.password,
        credentials.scope.as_deref(),
    )?;
    Ok(Json(token))
}

pub async fn logout_handler(State(state): State<Arc<AppState>>, user: AuthUser) -> Json<Value> {
    let revoked = state.service.auth.logout(&user);
    Json(json!({ "success": revoked, "message": "Logged out" }))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ServiceResult<Json<UserRecord>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(state.service.auth.get_user(&user.username)?))
}

#[derive(Debug, Serialize)]
pub struct ScopesResponse {
    pub username: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub async fn my_scopes_handler(user: AuthUser) -> Json<ScopesResponse> {
    Json(ScopesResponse {
        username: user.username,
        scopes: user.scopes,
        expires_at: user.expires_at,
    })
}

pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ServiceResult<Json<Vec<UserRecord>>> {
    user.require_scope(SCOPE_ADMIN)?;
    Ok(Json(state.service.auth.list_users()?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::json;

    #[tokio::test]
    async fn test_token_from_json_and_form() {
        let app = TestApp::new().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": "editor", "password": "editorpassword"}).to_string(),
            ))
            .unwrap();
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], json!("bearer"));
        assert_eq!(body["scopes"], json!(["read", "write"]));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=adminpassword&scope=read"))
            .unwrap();
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scopes"], json!(["read"]));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthorized() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": "admin", "password": "nope"}).to_string(),
            ))
            .unwrap();
        let (status, headers, body) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(body["message"], json!("Incorrect username or password"));
    }

    #[tokio::test]
    async fn test_me_scopes_and_admin_listing() {
        let app = TestApp::new().await;

        let (status, _) = app.get("/api/v1/auth/users/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let user = app.token("user", "userpassword");
        let (status, body) = app.get("/api/v1/auth/users/me", Some(&user)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], json!("user"));
        assert!(body.get("password_hash").is_none());

        let (_, body) = app.get("/api/v1/auth/users/me/scopes", Some(&user)).await;
        assert_eq!(body["scopes"], json!(["read"]));

        let (status, _) = app.get("/api/v1/auth/admin/users", Some(&user)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.admin_token();
        let (status, body) = app.get("/api/v1/auth/admin/users", Some(&admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let app = TestApp::new().await;
        let token = app.admin_token();
        let (status, body) = app.post_json("/api/v1/auth/logout", &token, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));

        let (status, _) = app.get("/api/v1/auth/users/me", Some(&token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
