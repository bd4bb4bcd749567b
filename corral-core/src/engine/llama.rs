//! llama.cpp specifics: request/response rewrites and `/tokenize` access.
//!
//! The gateway does not re-implement the engine protocol; the functions here
//! are the narrow seam where OpenAI-shaped traffic is adjusted to what a
//! llama-server build actually accepts.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::client::EngineError;

/// Fields the stock llama-server rejects outright. The effective list lives
/// in the model configuration (`strip_fields`) so it can track engine
/// versions without a rebuild; this is only the default.
const DEFAULT_STRIP_FIELDS: &[&str] = &["logit_bias", "logprobs", "top_logprobs", "user"];

pub fn default_strip_fields() -> Vec<String> {
    DEFAULT_STRIP_FIELDS.iter().map(|s| (*s).to_owned()).collect()
}

/// Remove strip-listed fields in place, warning once per elided field.
pub(super) fn strip_unsupported(body: &mut Map<String, Value>, strip_fields: &[String]) {
    for field in strip_fields {
        if body.remove(field).is_some() {
            warn!(field = %field, "removing request field unsupported by llama.cpp");
        }
    }
}

/// llama-server already speaks OpenAI shape for chat and text completions;
/// the response transform is the identity. Kept as an explicit seam so a
/// future engine revision has one place to rewrite.
pub(super) fn transform_response(_path: &str, body: Value) -> Value {
    body
}

/// Render chat messages the way the engine's chat template sees them, one
/// `role: content` line per message.
pub(super) fn chat_template_text(messages: &[crate::request::MessageText<'_>]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Count tokens for `text` via the running engine's `POST /tokenize`.
pub(super) async fn tokenize(
    http: &reqwest::Client,
    base_url: &str,
    text: &str,
) -> Result<u64, EngineError> {
    let url = format!("{base_url}/tokenize");
    let response = http
        .post(&url)
        .json(&serde_json::json!({ "content": text }))
        .send()
        .await
        .map_err(|source| EngineError::Unreachable {
            base_url: base_url.to_owned(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::TokenizeStatus {
            status: status.as_u16(),
        });
    }

    let parsed: Value = response
        .json()
        .await
        .map_err(|source| EngineError::Unreachable {
            base_url: base_url.to_owned(),
            source,
        })?;

    let tokens = parsed
        .get("tokens")
        .and_then(Value::as_array)
        .ok_or(EngineError::TokenizeShape)?;

    debug!(count = tokens.len(), "engine tokenized request content");
    Ok(tokens.len() as u64)
}
