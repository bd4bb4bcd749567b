//! OpenAI-compatible API v1 request types.
//!
//! These structures document the validated envelope of each endpoint.
//! Handlers deliberately work on raw `serde_json::Value` bodies — requests
//! are forwarded to the engine largely unchanged, and rigid structs would
//! silently drop fields the engine understands — so the types here exist
//! for the OpenAPI surface and for tests.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    /// The role of the message author (`"system"`, `"user"`, `"assistant"`).
    pub role: String,
    /// The content of the message.
    pub content: String,
}

/// Validated envelope of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    /// The configured model name to route to.
    pub model: String,
    /// Conversation history; must be non-empty.
    pub messages: Vec<ChatMessage>,
    /// When `true`, the engine's SSE stream is relayed verbatim.
    #[serde(default)]
    pub stream: bool,
    /// Completion-token budget; when absent the configured reservation is
    /// charged during variant selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// Validated envelope of `POST /v1/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionRequest {
    pub model: String,
    /// A prompt string, or a list of prompt strings.
    #[schema(value_type = Object)]
    pub prompt: serde_json::Value,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// Validated envelope of `POST /v1/embeddings`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmbeddingsRequest {
    pub model: String,
    /// An input string, or a list of input strings.
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
}
