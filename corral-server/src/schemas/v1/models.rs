//! Response types for the model listing endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelCard {
    /// The configured model name.
    pub id: String,
    /// Always `"model"`.
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Response body of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelList {
    /// Always `"list"`.
    pub object: String,
    pub data: Vec<ModelCard>,
}

/// Response body of `GET /v1/models/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    pub id: String,
    /// Always `"model"`.
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    /// Engine type serving this model.
    pub engine: String,
    /// Context window of every variant, ascending.
    pub context_sizes: Vec<u64>,
}
