use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{OllamaConfig, RuntimeConfig};
use crate::error::{OllamaError, ServiceError, ServiceResult};

/// Ollama API client. Reads the `ollama` settings on every call so URL and
/// model changes apply without a restart.
pub struct OllamaClient {
    client: Client,
    runtime_config: Arc<RuntimeConfig>,
}

impl OllamaClient {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        let base_url = runtime_config.dynamic().ollama.base_url.clone();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                ServiceError::Ollama(OllamaError::Connection {
                    url: base_url,
                    source: e,
                })
            })?;

        Ok(Self {
            client,
            runtime_config,
        })
    }

    fn config(&self) -> OllamaConfig {
        self.runtime_config.dynamic().ollama.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.runtime_config.dynamic().ollama.enabled
    }

    /// Check if Ollama is enabled and answering
    pub async fn health_check(&self) -> bool {
        let config = self.config();
        if !config.enabled {
            return false;
        }
        let url = format!("{}/api/tags", config.base_url);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        }
    }

    /// Names of the installed models
    pub async fn list_models(&self) -> ServiceResult<Vec<String>> {
        let config = self.config();
        let url = format!("{}/api/tags", config.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::Ollama(OllamaError::Generation {
                status: response.status().as_u16(),
                message: "Failed to list models".to_string(),
            }));
        }

        let tags: TagsResponse = response.json().await.map_err(invalid_response)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Non-streaming chat completion with the configured default model
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> ServiceResult<String> {
        let config = self.config();
        self.complete(&config, &config.default_model, messages).await
    }

    /// Ask the vision model about an image. Fails with ModelNotFound when no
    /// vision model is configured.
    pub async fn describe_image(&self, prompt: &str, image_base64: String) -> ServiceResult<String> {
        let config = self.config();
        if config.vision_model.trim().is_empty() {
            return Err(ServiceError::Ollama(OllamaError::ModelNotFound {
                model: "(no vision model configured)".to_string(),
            }));
        }
        let messages = vec![ChatMessage::user_with_image(prompt, image_base64)];
        self.complete(&config, &config.vision_model, messages).await
    }

    async fn complete(
        &self,
        config: &OllamaConfig,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> ServiceResult<String> {
        let url = format!("{}/api/chat", config.base_url);

        let request = OllamaChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(config.temperature),
            }),
        };

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();

            if message.contains("model") && message.contains("not found") {
                return Err(ServiceError::Ollama(OllamaError::ModelNotFound {
                    model: model.to_string(),
                }));
            }

            return Err(ServiceError::Ollama(OllamaError::Generation {
                status,
                message,
            }));
        }

        let chat_response: OllamaChatResponse =
            response.json().await.map_err(invalid_response)?;
        debug!(model = %model, chars = chat_response.message.content.len(), "Ollama replied");

        Ok(chat_response.message.content)
    }
}

fn invalid_response(e: reqwest::Error) -> OllamaError {
    OllamaError::InvalidResponse {
        source: serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )),
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images for vision models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            images: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// Create a user message with an image for vision models
    pub fn user_with_image(content: impl Into<String>, image_base64: String) -> Self {
        Self {
            images: Some(vec![image_base64]),
            ..Self::user(content)
        }
    }
}

// Internal Ollama API types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_request_omits_missing_images() {
        let request = OllamaChatRequest {
            model: "llama3.2".to_string(),
            messages: vec![
                ChatMessage::system("context"),
                ChatMessage::user_with_image("what is this?", "aGk=".to_string()),
            ],
            stream: false,
            options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["messages"][0].get("images").is_none());
        assert_eq!(json["messages"][1]["images"][0], "aGk=");
        assert!(json.get("options").is_none());
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn test_disabled_client_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let client = OllamaClient::new(Arc::new(test_config(dir.path()))).unwrap();
        assert!(!client.is_enabled());
        assert!(!client.health_check().await);
    }

    #[tokio::test]
    async fn test_describe_image_requires_vision_model() {
        let dir = tempfile::tempdir().unwrap();
        let client = OllamaClient::new(Arc::new(test_config(dir.path()))).unwrap();
        let result = client.describe_image("read", "aGk=".to_string()).await;
        assert!(matches!(
            result,
            Err(ServiceError::Ollama(OllamaError::ModelNotFound { .. }))
        ));
    }
}
