//! Embeddings route, served only by embedding-capable engine kinds.
//!
//! The endpoint-support check in the forward pipeline rejects models whose
//! engine kind does not advertise `/v1/embeddings`.

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
use crate::schemas::v1::chat::EmbeddingsRequest;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(embeddings), components(schemas(EmbeddingsRequest)))]
pub struct EmbeddingsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(embeddings))
}

/// OpenAI embeddings (`POST /v1/embeddings`).
#[utoipa::path(
    post,
    path = "/v1/embeddings",
    tag = "embeddings",
    request_body = EmbeddingsRequest,
    responses(
        (status = 200, description = "Embeddings computed"),
        (status = 400, description = "Invalid request or unsupported engine type"),
        (status = 502, description = "Engine failed mid-request"),
        (status = 503, description = "Engine could not be started"),
    )
)]
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let body = parse_json_object(&body)?;
    validate_embeddings(&body)?;
    run_inference(state, "/v1/embeddings", body).await
}

fn validate_embeddings(body: &Value) -> Result<(), ServerError> {
    if body.get("model").and_then(Value::as_str).is_none() {
        return Err(ServerError::BadRequest(
            "missing required field 'model'".to_owned(),
        ));
    }
    match body.get("input") {
        Some(Value::String(_)) => Ok(()),
        Some(Value::Array(items)) if !items.is_empty() => Ok(()),
        Some(Value::Array(_)) => Err(ServerError::BadRequest(
            "'input' list must not be empty".to_owned(),
        )),
        _ => Err(ServerError::BadRequest(
            "'input' must be a string or a list of strings".to_owned(),
        )),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_string_input() {
        assert!(validate_embeddings(&json!({ "model": "m", "input": "embed" })).is_ok());
    }

    #[test]
    fn rejects_missing_input() {
        assert!(validate_embeddings(&json!({ "model": "m" })).is_err());
    }

    #[test]
    fn rejects_empty_input_list() {
        assert!(validate_embeddings(&json!({ "model": "m", "input": [] })).is_err());
    }
}
