//! OpenAI-compatible chat-completion route.

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
use crate::schemas::v1::chat::{ChatCompletionRequest, ChatMessage};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(chat_completions),
    components(schemas(ChatCompletionRequest, ChatMessage))
)]
pub struct ChatApi;

/// Register chat-completion routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

/// OpenAI chat completions (`POST /v1/chat/completions`).
///
/// Routes the request to the smallest sufficient variant of the named
/// model, starting or switching the engine process when necessary. When
/// `stream: true`, the engine's SSE stream is relayed byte-for-byte.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion generated (JSON, or SSE when streaming)"),
        (status = 400, description = "Invalid request, unknown model, or context overflow"),
        (status = 502, description = "Engine failed mid-request"),
        (status = 503, description = "Engine could not be started"),
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let body = parse_json_object(&body)?;
    validate_chat_completion(&body)?;
    run_inference(state, "/v1/chat/completions", body).await
}

fn validate_chat_completion(body: &Value) -> Result<(), ServerError> {
    if body.get("model").and_then(Value::as_str).is_none() {
        return Err(ServerError::BadRequest(
            "missing required field 'model'".to_owned(),
        ));
    }
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| ServerError::BadRequest("'messages' must be an array".to_owned()))?;
    if messages.is_empty() {
        return Err(ServerError::BadRequest(
            "'messages' must not be empty".to_owned(),
        ));
    }
    for (index, message) in messages.iter().enumerate() {
        if !message.is_object() {
            return Err(ServerError::BadRequest(format!(
                "message at index {index} must be an object"
            )));
        }
        if message.get("role").and_then(Value::as_str).is_none() {
            return Err(ServerError::BadRequest(format!(
                "message at index {index} is missing 'role'"
            )));
        }
        if message.get("content").is_none() {
            return Err(ServerError::BadRequest(format!(
                "message at index {index} is missing 'content'"
            )));
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
