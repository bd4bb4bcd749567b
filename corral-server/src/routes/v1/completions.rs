//! OpenAI-compatible text-completion route.
//!
//! Structurally the same pipeline as chat completions; only the validated
//! envelope differs (`prompt` instead of `messages`).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::routes::v1::forward::{parse_json_object, run_inference};
use crate::schemas::v1::chat::CompletionRequest;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(completions), components(schemas(CompletionRequest)))]
pub struct CompletionsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/completions", post(completions))
}

/// OpenAI text completions (`POST /v1/completions`).
#[utoipa::path(
    post,
    path = "/v1/completions",
    tag = "completions",
    request_body = CompletionRequest,
    responses(
        (status = 200, description = "Completion generated (JSON, or SSE when streaming)"),
        (status = 400, description = "Invalid request, unknown model, or context overflow"),
        (status = 502, description = "Engine failed mid-request"),
        (status = 503, description = "Engine could not be started"),
    )
)]
pub async fn completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let body = parse_json_object(&body)?;
    validate_completion(&body)?;
    run_inference(state, "/v1/completions", body).await
}

fn validate_completion(body: &Value) -> Result<(), ServerError> {
    if body.get("model").and_then(Value::as_str).is_none() {
        return Err(ServerError::BadRequest(
            "missing required field 'model'".to_owned(),
        ));
    }
    match body.get("prompt") {
        Some(Value::String(_)) => Ok(()),
        Some(Value::Array(items)) if !items.is_empty() => Ok(()),
        Some(Value::Array(_)) => Err(ServerError::BadRequest(
            "'prompt' list must not be empty".to_owned(),
        )),
        _ => Err(ServerError::BadRequest(
            "'prompt' must be a string or a list of strings".to_owned(),
        )),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_string_prompt() {
        assert!(validate_completion(&json!({ "model": "m", "prompt": "once" })).is_ok());
    }

    #[test]
    fn accepts_prompt_list() {
        assert!(validate_completion(&json!({ "model": "m", "prompt": ["a", "b"] })).is_ok());
    }

    #[test]
    fn rejects_empty_prompt_list() {
        assert!(validate_completion(&json!({ "model": "m", "prompt": [] })).is_err());
    }

    #[test]
    fn rejects_missing_prompt() {
        assert!(validate_completion(&json!({ "model": "m" })).is_err());
    }
}
