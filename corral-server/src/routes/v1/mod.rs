pub mod chat;
pub mod completions;
pub mod embeddings;
mod forward;
pub mod models;

use crate::state::AppState;
use utoipa::OpenApi;

use axum::Router;
use std::sync::Arc;

/// Routes nested under `/v1` (OpenAI-compatible).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(completions::router())
        .merge(embeddings::router())
        .merge(models::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(chat::ChatApi::openapi());
    spec.merge(completions::CompletionsApi::openapi());
    spec.merge(embeddings::EmbeddingsApi::openapi());
    spec.merge(models::ModelsApi::openapi());

    spec
}
