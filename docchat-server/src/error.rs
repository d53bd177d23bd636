//! Request-level errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docchat_core::{ChatError, EmbeddingError, IndexError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Embedding service unavailable: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index unavailable: {0}")]
    Index(#[from] IndexError),

    #[error("Chat service unavailable: {0}")]
    Chat(#[from] ChatError),
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidInput(msg.into())
    }

    /// Client mistakes are 400; every upstream failure is 503.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn retryable(&self) -> bool {
        match self {
            ApiError::InvalidInput(_) => false,
            ApiError::Embedding(e) => e.is_retryable(),
            ApiError::Index(e) => e.is_retryable(),
            ApiError::Chat(e) => e.is_retryable(),
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "error": self.to_string(),
            "retry": self.retryable(),
        })
    }

    pub fn into_parts(self) -> (StatusCode, serde_json::Value) {
        (self.status(), self.body())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::warn!(error = %self, retry = self.retryable(), "Upstream failure");
        }
        let (status, body) = self.into_parts();
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_is_400_without_retry() {
        let (status, body) = ApiError::invalid("query field is required").into_parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "query field is required");
        assert_eq!(body["retry"], false);
    }

    #[test]
    fn test_upstream_errors_are_503_with_retry_guidance() {
        let err = ApiError::from(EmbeddingError::RetryExhausted {
            attempts: 4,
            last: "API error (503): overloaded".into(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body()["retry"], true);

        let err = ApiError::from(ChatError::Api {
            code: 401,
            message: "bad key".into(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body()["retry"], false);
    }
}
