//! Runtime settings endpoints.
//!
//! Settings are dotted keys over the dynamic configuration. Updates are
//! stored in the database and hot-reloaded without a restart.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{AuthUser, SCOPE_ADMIN, SCOPE_READ};
use crate::error::ServiceResult;

use super::{ApiJson, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings_handler).put(update_settings_handler))
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// Effective values, defaults merged with stored overrides
    pub settings: HashMap<String, serde_json::Value>,
    /// Keys with a stored override
    pub overridden: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// `null` reverts a key to its default
    pub settings: HashMap<String, serde_json::Value>,
}

fn current_settings(state: &AppState) -> ServiceResult<SettingsResponse> {
    let stored = state.service.db.get_all_settings()?;
    let mut overridden: Vec<String> = stored.into_keys().collect();
    overridden.sort();
    Ok(SettingsResponse {
        settings: state.service.runtime_config.dynamic().to_key_value_map(),
        overridden,
    })
}

pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ServiceResult<Json<SettingsResponse>> {
    user.require_scope(SCOPE_READ)?;
    Ok(Json(current_settings(&state)?))
}

pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<UpdateSettingsRequest>,
) -> ServiceResult<Json<SettingsResponse>> {
    user.require_scope(SCOPE_ADMIN)?;
    state.service.update_settings(request.settings).await?;
    Ok(Json(current_settings(&state)?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_and_revert_setting() {
        let app = TestApp::new().await;
        let admin = app.admin_token();

        let (status, body) = app.get("/api/v1/settings", Some(&admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["cache.ttl_secs"], json!(3600));
        assert_eq!(body["overridden"], json!([]));

        let (status, body) = app
            .json_request(
                "PUT",
                "/api/v1/settings",
                &admin,
                json!({"settings": {"cache.ttl_secs": 120}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["cache.ttl_secs"], json!(120));
        assert_eq!(body["overridden"], json!(["cache.ttl_secs"]));
        assert_eq!(app.service.runtime_config.dynamic().cache.ttl_secs, 120);

        let (_, body) = app
            .json_request(
                "PUT",
                "/api/v1/settings",
                &admin,
                json!({"settings": {"cache.ttl_secs": null}}),
            )
            .await;
        assert_eq!(body["settings"]["cache.ttl_secs"], json!(3600));
    }

    #[tokio::test]
    async fn test_settings_need_admin_and_known_keys() {
        let app = TestApp::new().await;
        let editor = app.token("editor", "editorpassword");
        let (status, _) = app.get("/api/v1/settings", Some(&editor)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .json_request(
                "PUT",
                "/api/v1/settings",
                &editor,
                json!({"settings": {"cache.ttl_secs": 5}}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.admin_token();
        let (status, body) = app
            .json_request(
                "PUT",
                "/api/v1/settings",
                &admin,
                json!({"settings": {"cache.color": "blue"}}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("cache.color"));
    }
}
