//! Model listing endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::models::{ModelCard, ModelInfo, ModelList};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_models, model_info),
    components(schemas(ModelCard, ModelList, ModelInfo))
)]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/:model_id", get(model_info))
}

/// List configured models (`GET /v1/models`).
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "Configured models", body = ModelList))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .config
        .models
        .iter()
        .map(|model| ModelCard {
            id: model.name.clone(),
            object: "model".to_owned(),
            created: 0,
            owned_by: "gateway".to_owned(),
        })
        .collect();
    Json(ModelList {
        object: "list".to_owned(),
        data,
    })
}

/// Describe one model (`GET /v1/models/{model_id}`).
///
/// `context_sizes` lists every variant's window in ascending order.
#[utoipa::path(
    get,
    path = "/v1/models/{model_id}",
    tag = "models",
    params(("model_id" = String, Path, description = "Configured model name")),
    responses(
        (status = 200, description = "Model information", body = ModelInfo),
        (status = 404, description = "Unknown model"),
    )
)]
pub async fn model_info(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelInfo>, ServerError> {
    let model = state
        .config
        .model(&model_id)
        .ok_or_else(|| ServerError::NotFound(format!("model '{model_id}' is not configured")))?;

    Ok(Json(ModelInfo {
        id: model.name.clone(),
        object: "model".to_owned(),
        created: 0,
        owned_by: "gateway".to_owned(),
        engine: model.engine.to_string(),
        context_sizes: model.context_sizes(),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
