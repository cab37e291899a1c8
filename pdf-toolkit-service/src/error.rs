use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    #[error("Batch job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Chat session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Batch configuration not found: {name}")]
    ConfigurationNotFound { name: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("Missing required scope: {scope}")]
    Forbidden { scope: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Batch queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("{0}")]
    Ollama(#[from] OllamaError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Ollama client errors
#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("Connection failed to Ollama at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Invalid response from Ollama")]
    InvalidResponse {
        #[source]
        source: serde_json::Error,
    },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("PDF error: {message}")]
    Pdf { message: String },

    #[error("Page {page} out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    #[error("Document is encrypted")]
    Encrypted,

    #[error("Incorrect password")]
    InvalidPassword,

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Conversion failed: {message}")]
    Conversion { message: String },

    #[error("OCR failed: {message}")]
    Ocr { message: String },

    #[error("Rendering failed: {message}")]
    Render { message: String },

    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn pdf(message: impl std::fmt::Display) -> Self {
        ProcessingError::Pdf {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Processing(ProcessingError::Io(e))
    }
}

impl From<lopdf::Error> for ServiceError {
    fn from(e: lopdf::Error) -> Self {
        ServiceError::Processing(ProcessingError::pdf(e))
    }
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::FileNotFound { .. }
            | ServiceError::JobNotFound { .. }
            | ServiceError::SessionNotFound { .. }
            | ServiceError::ConfigurationNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Ollama(OllamaError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Ollama(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Processing(ProcessingError::PageOutOfRange { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Processing(
                ProcessingError::Pdf { .. }
                | ProcessingError::Encrypted
                | ProcessingError::InvalidPassword,
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Processing(ProcessingError::Timeout { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::FileNotFound { .. } => "file_not_found",
            ServiceError::JobNotFound { .. } => "job_not_found",
            ServiceError::SessionNotFound { .. } => "session_not_found",
            ServiceError::ConfigurationNotFound { .. } => "configuration_not_found",
            ServiceError::Unauthorized { .. } => "unauthorized",
            ServiceError::Forbidden { .. } => "forbidden",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::QueueFull { .. } => "queue_full",
            ServiceError::Ollama(OllamaError::Connection { .. }) => "ollama_connection",
            ServiceError::Ollama(OllamaError::ModelNotFound { .. }) => "ollama_model_not_found",
            ServiceError::Ollama(OllamaError::Generation { .. }) => "ollama_generation",
            ServiceError::Ollama(OllamaError::InvalidResponse { .. }) => "ollama_invalid_response",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(ProcessingError::Pdf { .. }) => "pdf_error",
            ServiceError::Processing(ProcessingError::PageOutOfRange { .. }) => {
                "page_out_of_range"
            }
            ServiceError::Processing(ProcessingError::Encrypted) => "encrypted_document",
            ServiceError::Processing(ProcessingError::InvalidPassword) => "invalid_password",
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::Conversion { .. }) => "conversion_error",
            ServiceError::Processing(ProcessingError::Ocr { .. }) => "ocr_error",
            ServiceError::Processing(ProcessingError::Render { .. }) => "render_error",
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::Processing(ProcessingError::Timeout { .. }) => "timeout",
            ServiceError::Processing(ProcessingError::Cancelled) => "cancelled",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let retry_after_secs = match &self {
            ServiceError::QueueFull { .. } => Some(5),
            _ => None,
        };

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            details: None,
            retry_after_secs,
        };

        let mut response = (status, Json(response)).into_response();
        let headers = response.headers_mut();
        match &self {
            ServiceError::Unauthorized { .. } => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            ServiceError::QueueFull { .. } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
            }
            _ => {}
        }
        response
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error with its full `source()` chain, outermost first.
pub fn format_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        current = source.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::FileNotFound {
                file_id: "x".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::QueueFull { capacity: 4 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::Processing(ProcessingError::FileTooLarge { size: 10, max: 5 })
                .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ServiceError::Processing(ProcessingError::InvalidPassword).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_unauthorized_sets_www_authenticate() {
        let response = ServiceError::Unauthorized {
            message: "Not authenticated".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn test_format_error_chain() {
        let err = ServiceError::Database(DatabaseError::Migration {
            message: "bad column".into(),
        });
        let text = format_error_chain(&err);
        assert!(text.starts_with("Database error"));
        assert!(text.contains("bad column"));
    }
}
