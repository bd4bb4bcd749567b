//! HTTP client for a single running engine.
//!
//! One `EngineClient` exists per live engine and is shared with request
//! handlers via `Arc`; it owns the connection pool to the engine and
//! dispatches engine-kind specifics through the capability table.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{llama, EngineKind};
use crate::request;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine at {base_url} is unreachable")]
    Unreachable {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("engine /tokenize returned status {status}")]
    TokenizeStatus { status: u16 },

    #[error("engine /tokenize returned an unexpected body")]
    TokenizeShape,

    #[error("request body carries no tokenizable content")]
    NoContent,
}

#[derive(Debug)]
pub struct EngineClient {
    kind: EngineKind,
    base_url: String,
    strip_fields: Vec<String>,
    http: reqwest::Client,
}

impl EngineClient {
    /// Build a client for an engine expected at `base_url`.
    ///
    /// The underlying pool carries no total-request timeout: model output can
    /// be arbitrarily long. Health and tokenize calls set per-request
    /// deadlines instead.
    pub fn new(kind: EngineKind, base_url: String, strip_fields: Vec<String>) -> Self {
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_owned(),
            strip_fields,
            http: reqwest::Client::new(),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Inference endpoints this engine accepts. Pure and static per kind.
    pub fn supported_endpoints(&self) -> &'static [&'static str] {
        self.kind.caps().endpoints
    }

    pub fn supports_endpoint(&self, path: &str) -> bool {
        self.kind.caps().endpoints.contains(&path)
    }

    /// Whether a live instance can count tokens through `/tokenize`.
    pub fn supports_online_tokenize(&self) -> bool {
        self.kind.caps().online_tokenize
    }

    /// Probe the engine's health path, falling back to the secondary path
    /// when the primary answers 404 (older llama-server builds).
    ///
    /// Never errors: connect refusal, 5xx and timeout all report `false`.
    pub async fn check_health(&self, timeout: Duration) -> bool {
        let caps = self.kind.caps();
        match self.probe(caps.health_path, timeout).await {
            Some(status) if status.is_success() => true,
            Some(status) if status.as_u16() == 404 => self
                .probe(caps.health_fallback_path, timeout)
                .await
                .is_some_and(|s| s.is_success()),
            _ => false,
        }
    }

    async fn probe(&self, path: &str, timeout: Duration) -> Option<reqwest::StatusCode> {
        let url = format!("{}{}", self.base_url, path);
        match self.http.get(&url).timeout(timeout).send().await {
            Ok(response) => Some(response.status()),
            Err(error) => {
                debug!(%url, %error, "health probe failed");
                None
            }
        }
    }

    /// Elide fields the engine rejects. Semantics of supported fields are
    /// never altered; every removal is logged by name.
    pub fn transform_request(&self, _path: &str, body: &mut Value) {
        if let Some(map) = body.as_object_mut() {
            llama::strip_unsupported(map, &self.strip_fields);
        }
    }

    /// Rewrite an engine response into OpenAI shape. Identity for llama.cpp.
    pub fn transform_response(&self, path: &str, body: Value) -> Value {
        llama::transform_response(path, body)
    }

    /// Count the tokens this request will occupy in the engine's context,
    /// including the completion reservation.
    ///
    /// Chat requests are rendered through the engine's chat template view
    /// (`role: content` lines) before tokenizing; text completions and
    /// embeddings tokenize their prompt/input directly.
    pub async fn estimate_tokens(
        &self,
        body: &Value,
        max_tokens_reservation: u64,
    ) -> Result<u64, EngineError> {
        let text = if let Some(messages) = request::chat_messages(body) {
            llama::chat_template_text(&messages)
        } else if let Some(prompt) = request::prompt_text(body) {
            prompt
        } else if let Some(input) = request::input_text(body) {
            input
        } else {
            return Err(EngineError::NoContent);
        };

        let prompt_tokens = llama::tokenize(&self.http, &self.base_url, &text).await?;
        let reserve = request::max_tokens(body).unwrap_or(max_tokens_reservation);
        Ok(prompt_tokens + reserve)
    }

    /// Forward an inference request body to the engine.
    ///
    /// Applies [`transform_request`](Self::transform_request) to a copy and
    /// returns the upstream response for the caller to buffer or stream.
    pub async fn forward(&self, path: &str, body: &Value) -> Result<reqwest::Response, EngineError> {
        let mut outbound = body.clone();
        self.transform_request(path, &mut outbound);

        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "forwarding request to engine");
        self.http
            .post(&url)
            .json(&outbound)
            .send()
            .await
            .map_err(|source| EngineError::Unreachable {
                base_url: self.base_url.clone(),
                source,
            })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    /// Bind a throwaway engine stub on port 0 and return its base URL.
    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> EngineClient {
        EngineClient::new(EngineKind::LlamaCpp, base_url, llama::default_strip_fields())
    }

    #[tokio::test]
    async fn health_passes_on_200() {
        let base = spawn_stub(Router::new().route("/health", get(|| async { "ok" }))).await;
        assert!(client(base).check_health(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn health_falls_back_to_models_on_404() {
        let base = spawn_stub(
            Router::new().route("/v1/models", get(|| async { Json(json!({"object": "list"})) })),
        )
        .await;
        assert!(client(base).check_health(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn health_fails_on_refused_connection() {
        // Nothing listens on this port once the listener is dropped.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        assert!(!client(base).check_health(Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn estimate_counts_tokens_plus_max_tokens() {
        let base = spawn_stub(Router::new().route(
            "/tokenize",
            post(|| async { Json(json!({ "tokens": [1, 2, 3, 4, 5] })) }),
        ))
        .await;
        let body = json!({
            "messages": [{ "role": "user", "content": "hello" }],
            "max_tokens": 100
        });
        let estimate = client(base).estimate_tokens(&body, 1024).await.unwrap();
        assert_eq!(estimate, 105);
    }

    #[tokio::test]
    async fn estimate_uses_reservation_without_max_tokens() {
        let base = spawn_stub(Router::new().route(
            "/tokenize",
            post(|| async { Json(json!({ "tokens": [1, 2, 3] })) }),
        ))
        .await;
        let body = json!({ "prompt": "tell me a story" });
        let estimate = client(base).estimate_tokens(&body, 1024).await.unwrap();
        assert_eq!(estimate, 3 + 1024);
    }

    #[tokio::test]
    async fn estimate_rejects_empty_requests() {
        let base = spawn_stub(Router::new()).await;
        let err = client(base).estimate_tokens(&json!({}), 1024).await;
        assert!(matches!(err, Err(EngineError::NoContent)));
    }

    #[tokio::test]
    async fn forward_strips_unsupported_fields() {
        let base = spawn_stub(Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move { Json(body) }),
        ))
        .await;
        let body = json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "hi" }],
            "logit_bias": { "1": -100 }
        });
        let response = client(base).forward("/v1/chat/completions", &body).await.unwrap();
        let echoed: Value = response.json().await.unwrap();
        assert!(echoed.get("logit_bias").is_none());
        assert_eq!(echoed["model"], "m");
    }
}
