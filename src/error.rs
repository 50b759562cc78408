use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Rulesync agent
#[derive(Error, Debug)]
pub enum RuleSyncError {
    // Network errors (retried inside the fetcher's mirror/retry chain)
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Invalid rule content: {0}")]
    ContentInvalid(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Provider errors
    #[error("Rule provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("Rule provider is disabled: {name}")]
    ProviderDisabled { name: String },

    // Settings document errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Process control errors
    #[error("Process control error: {0}")]
    ProcessControl(String),

    #[error("Operation timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Rulesync operations
pub type Result<T> = std::result::Result<T, RuleSyncError>;

impl RuleSyncError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RuleSyncError::InvalidConfig(_) | RuleSyncError::ContentInvalid(_) => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            RuleSyncError::ProviderNotFound { .. } | RuleSyncError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            RuleSyncError::ProviderDisabled { .. } => StatusCode::CONFLICT,

            // 502 Bad Gateway
            RuleSyncError::TransientNetwork(_) | RuleSyncError::Http(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            RuleSyncError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            RuleSyncError::ProcessControl(_)
            | RuleSyncError::Io(_)
            | RuleSyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// True for errors the fetcher retries within its own mirror/retry chain
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuleSyncError::TransientNetwork(_)
                | RuleSyncError::ContentInvalid(_)
                | RuleSyncError::Http(_)
        )
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RuleSyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from reqwest errors (all transport-level failures are transient)
impl From<reqwest::Error> for RuleSyncError {
    fn from(err: reqwest::Error) -> Self {
        RuleSyncError::TransientNetwork(err.to_string())
    }
}

// Convert from JSON errors (config and cache files)
impl From<serde_json::Error> for RuleSyncError {
    fn from(err: serde_json::Error) -> Self {
        RuleSyncError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            RuleSyncError::InvalidConfig("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RuleSyncError::ProviderNotFound {
                name: "cn_domain".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RuleSyncError::NotFound("bypassText".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RuleSyncError::TransientNetwork("reset".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RuleSyncError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            RuleSyncError::ProcessControl("kill failed".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(RuleSyncError::InvalidConfig("bad".to_string()).is_client_error());
        assert!(!RuleSyncError::InvalidConfig("bad".to_string()).is_server_error());

        assert!(RuleSyncError::Timeout.is_server_error());
        assert!(!RuleSyncError::Timeout.is_client_error());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RuleSyncError::TransientNetwork("EOF".into()).is_retryable());
        assert!(RuleSyncError::ContentInvalid("too short".into()).is_retryable());
        assert!(RuleSyncError::Http("status 500".into()).is_retryable());
        assert!(!RuleSyncError::NotFound("bypassText".into()).is_retryable());
        assert!(!RuleSyncError::Timeout.is_retryable());
    }
}
