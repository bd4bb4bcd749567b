//! Read-only views over OpenAI-shaped JSON request bodies.
//!
//! Requests are forwarded largely unchanged, so the gateway never
//! deserializes them into rigid structs; these helpers extract just the
//! fields the estimator and selector need.

use serde_json::Value;

/// The caller's completion-token budget: `max_tokens`, falling back to the
/// newer `max_completion_tokens` alias.
pub fn max_tokens(body: &Value) -> Option<u64> {
    body.get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(Value::as_u64)
}

/// One chat message reduced to its textual content.
#[derive(Debug)]
pub struct MessageText<'a> {
    pub role: &'a str,
    pub content: String,
}

/// Extract the textual content of every chat message.
///
/// Multi-modal content arrays contribute their `{"type": "text"}` parts;
/// image parts are skipped (they do not tokenize as text).
pub fn chat_messages(body: &Value) -> Option<Vec<MessageText<'_>>> {
    let messages = body.get("messages")?.as_array()?;
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let content = match message.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => {
                let mut text = String::new();
                for part in parts {
                    if part.get("type").and_then(Value::as_str) == Some("text") {
                        if let Some(t) = part.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                }
                text
            }
            _ => String::new(),
        };
        out.push(MessageText { role, content });
    }
    Some(out)
}

/// The prompt of a text-completion request; list prompts are concatenated.
pub fn prompt_text(body: &Value) -> Option<String> {
    match body.get("prompt")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

/// The input of an embeddings request; list inputs are concatenated.
pub fn input_text(body: &Value) -> Option<String> {
    match body.get("input")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

/// Tokenizable text for the offline path plus the chat message count.
///
/// Chat message contents are joined with `separator` without their roles;
/// no chat template is applied, which is why offline counting is the less
/// precise path.
pub fn tokenizable_text(body: &Value, separator: &str) -> Option<(String, u64)> {
    if let Some(messages) = chat_messages(body) {
        let count = messages.len() as u64;
        let text = messages
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join(separator);
        return Some((text, count));
    }
    if let Some(prompt) = prompt_text(body) {
        return Some((prompt, 0));
    }
    if let Some(input) = input_text(body) {
        return Some((input, 0));
    }
    None
}

/// Total character count of whatever content the request carries.
pub fn content_chars(body: &Value) -> u64 {
    tokenizable_text(body, "")
        .map(|(text, _)| text.chars().count() as u64)
        .unwrap_or(0)
}
