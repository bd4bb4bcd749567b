//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically rendered as
//! the OpenAI error body
//! `{"error": {"message": …, "type": …, "code": …}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use corral_core::{EngineError, SelectError, SuperviseError};

/// All errors that can occur in the request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Variant selection failed (unknown model, context overflow).
    #[error(transparent)]
    Select(#[from] SelectError),

    /// The supervisor could not produce a healthy engine.
    #[error(transparent)]
    Supervise(#[from] SuperviseError),

    /// Talking to a live engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Select(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Supervise(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Engine(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) | ServerError::NotFound(_) | ServerError::Select(_) => {
                "invalid_request_error"
            }
            ServerError::Supervise(_) | ServerError::Engine(_) => "upstream_error",
            ServerError::Internal(_) => "internal_error",
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ServerError::Select(SelectError::ModelNotFound { .. }) => Some("model_not_found"),
            ServerError::Select(SelectError::ContextTooLarge { .. }) => Some("context_too_large"),
            ServerError::Supervise(SuperviseError::StartupTimeout { .. }) => {
                Some("engine_startup_timeout")
            }
            ServerError::Supervise(_) => Some("engine_unavailable"),
            ServerError::Engine(_) => Some("engine_unreachable"),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Engine and supervisor failures carry useful detail for operators;
        // log the full chain before the message goes out.
        if status.is_server_error() {
            error!(error = ?self, "request failed");
        }

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.code(),
            }
        });
        (status, Json(body)).into_response()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_errors_are_client_errors() {
        let err = ServerError::Select(SelectError::ModelNotFound {
            model: "nope".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");
        assert_eq!(err.code(), Some("model_not_found"));
    }

    #[test]
    fn context_overflow_mentions_both_sizes() {
        let err = ServerError::Select(SelectError::ContextTooLarge {
            model: "m".into(),
            required: 40_000,
            max_context: 32_000,
        });
        let message = err.to_string();
        assert!(message.contains("40000"));
        assert!(message.contains("32000"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn startup_timeout_maps_to_503() {
        let err = ServerError::Supervise(SuperviseError::StartupTimeout { timeout_secs: 60 });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_type(), "upstream_error");
        assert_eq!(err.code(), Some("engine_startup_timeout"));
    }

    #[test]
    fn internal_errors_map_to_500() {
        let err = ServerError::Internal("boom".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "internal_error");
        assert_eq!(err.code(), None);
    }
}
