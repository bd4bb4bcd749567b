//! The forward pipeline shared by every inference endpoint:
//! lock → select → ensure → forward → relay (buffered or streamed).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::state::AppState;

/// Drive one inference request end-to-end.
///
/// Holds the global request lock for the whole forward: for buffered
/// responses until the body is relayed, for streamed responses until the
/// client stream is exhausted or dropped. A client that disconnects
/// mid-stream merely drops the upstream read; the engine stays up.
pub(crate) async fn run_inference(
    state: Arc<AppState>,
    path: &'static str,
    body: Value,
) -> Result<Response, ServerError> {
    let model_name = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::BadRequest("missing required field 'model'".to_owned()))?
        .to_owned();

    // From here on exactly one inference request is in flight.
    let in_flight = Arc::clone(&state.request_lock).lock_owned().await;

    let selection = state.selector.select(&model_name, &body).await?;
    debug!(
        model = %model_name,
        context = selection.variant.context,
        estimated = selection.estimated,
        required = selection.required,
        "variant selected"
    );

    let client = state
        .supervisor
        .ensure(selection.model, selection.variant)
        .await?;

    if !client.supports_endpoint(path) {
        return Err(ServerError::BadRequest(format!(
            "endpoint {path} is not supported by engine type {}",
            client.kind()
        )));
    }

    state.supervisor.touch().await;

    let dump = state.dumps.as_ref().map(|dumps| dumps.begin());
    if let Some(dump) = &dump {
        dump.write_request(&body);
    }

    let stream_requested = body
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let upstream = client.forward(path, &body).await?;
    let upstream_status = upstream.status().as_u16();
    let relay_status =
        StatusCode::from_u16(upstream_status).unwrap_or(StatusCode::BAD_GATEWAY);

    if stream_requested && upstream.status().is_success() {
        // Byte-exact SSE relay. The request lock and the dump ride inside
        // the closure, so both live exactly as long as the stream.
        let content_type = upstream
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/event-stream")
            .to_owned();

        let relay = upstream.bytes_stream().map(move |chunk| {
            let _in_flight = &in_flight;
            match chunk {
                Ok(bytes) => {
                    if let Some(dump) = &dump {
                        dump.append_chunk(&bytes);
                    }
                    Ok(bytes)
                }
                Err(error) => {
                    warn!(%error, "engine stream failed mid-flight; closing response");
                    Err(error)
                }
            }
        });

        let response = Response::builder()
            .status(relay_status)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(relay))
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        return Ok(response);
    }

    // Buffered path; also used to relay upstream error bodies for requests
    // that asked for streaming.
    let upstream_ok = upstream.status().is_success();
    let bytes = upstream.bytes().await.map_err(|source| {
        ServerError::Engine(corral_core::EngineError::Unreachable {
            base_url: client.base_url().to_owned(),
            source,
        })
    })?;
    state.supervisor.touch().await;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(parsed) => {
            let outbound = if upstream_ok {
                client.transform_response(path, parsed)
            } else {
                // Engine error bodies are relayed as-is.
                parsed
            };
            if let Some(dump) = &dump {
                dump.write_response(&outbound);
            }
            Ok((relay_status, Json(outbound)).into_response())
        }
        Err(_) if upstream_ok => Err(ServerError::Internal(
            "engine returned a non-JSON response body".to_owned(),
        )),
        Err(_) => {
            // Shape a non-JSON upstream failure into the OpenAI error body.
            let message = String::from_utf8_lossy(&bytes).into_owned();
            Ok((
                relay_status,
                Json(serde_json::json!({
                    "error": {
                        "message": message,
                        "type": "upstream_error",
                        "code": null,
                    }
                })),
            )
                .into_response())
        }
    }
}

/// Parse raw request bytes as a JSON object.
pub(crate) fn parse_json_object(bytes: &[u8]) -> Result<Value, ServerError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|_| ServerError::BadRequest("invalid JSON in request body".to_owned()))?;
    if !value.is_object() {
        return Err(ServerError::BadRequest(
            "request body must be a JSON object".to_owned(),
        ));
    }
    Ok(value)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::{get, post};
    use axum::Router;
    use corral_core::GatewayConfig;
    use serde_json::json;

    const SSE_PAYLOAD: &str =
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";

    /// Fake llama-server: healthy, echoes chat completions either as JSON or
    /// as a pre-framed SSE body.
    async fn spawn_engine_stub() -> String {
        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/v1/chat/completions",
                post(|Json(body): Json<Value>| async move {
                    if body.get("stream").and_then(Value::as_bool).unwrap_or(false) {
                        ([(CONTENT_TYPE, "text/event-stream")], SSE_PAYLOAD).into_response()
                    } else {
                        Json(json!({ "object": "chat.completion", "choices": [] }))
                            .into_response()
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    /// Fake engine whose inference endpoint always fails.
    async fn spawn_failing_stub() -> String {
        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/v1/chat/completions",
                post(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": { "message": "kv cache exhausted" } })),
                    )
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn state_for(connect: &str) -> Arc<AppState> {
        let config = GatewayConfig::from_toml_str(&format!(
            r#"
            [[models]]
            name = "stub-model"
            engine = "llama.cpp"
            connect = "{connect}"

            [[models.variants]]
            binary = "/bin/sleep"
            args = ["30"]
            context = 8192
            health_check_timeout_secs = 1
            engine_startup_timeout_secs = 5
        "#
        ))
        .unwrap();
        Arc::new(AppState::new(Arc::new(config), None))
    }

    fn chat_body(stream: bool) -> Value {
        json!({
            "model": "stub-model",
            "messages": [{ "role": "user", "content": "hello" }],
            "max_tokens": 64,
            "stream": stream
        })
    }

    /// Bytes forwarded to the client must be an exact copy of the engine's
    /// SSE output, terminal `data: [DONE]` included.
    #[tokio::test]
    async fn streaming_relays_engine_bytes_verbatim() {
        let connect = spawn_engine_stub().await;
        let state = state_for(&connect);

        let response = run_inference(Arc::clone(&state), "/v1/chat/completions", chat_body(true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], SSE_PAYLOAD.as_bytes());

        state.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn buffered_response_is_relayed_as_json() {
        let connect = spawn_engine_stub().await;
        let state = state_for(&connect);

        let response = run_inference(Arc::clone(&state), "/v1/chat/completions", chat_body(false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["object"], "chat.completion");

        state.supervisor.shutdown().await;
    }

    /// Upstream 4xx/5xx are relayed with status and body.
    #[tokio::test]
    async fn upstream_error_status_is_relayed() {
        let connect = spawn_failing_stub().await;
        let state = state_for(&connect);

        let response = run_inference(Arc::clone(&state), "/v1/chat/completions", chat_body(false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"]["message"], "kv cache exhausted");

        state.supervisor.shutdown().await;
    }

    /// llama.cpp (non-sideload) does not serve embeddings; the forward
    /// pipeline rejects the endpoint after ensure.
    #[tokio::test]
    async fn unsupported_endpoint_is_rejected() {
        let connect = spawn_engine_stub().await;
        let state = state_for(&connect);

        let body = json!({ "model": "stub-model", "input": "embed me" });
        let result = run_inference(Arc::clone(&state), "/v1/embeddings", body).await;
        assert!(matches!(result, Err(ServerError::BadRequest(_))));

        state.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_model_fails_before_any_engine_work() {
        let state = state_for("http://127.0.0.1:1");
        let body = json!({ "model": "ghost", "messages": [{ "role": "user", "content": "x" }] });
        let result = run_inference(Arc::clone(&state), "/v1/chat/completions", body).await;
        assert!(matches!(result, Err(ServerError::Select(_))));
        assert!(state.supervisor.status().await.is_none());
    }
}

