//! Health / heartbeat endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Reports the gateway version, the configured model count and a snapshot
/// of the currently running engine (if any). Monitoring systems should
/// poll this endpoint; it never takes the request lock.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Gateway is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let engine = match state.supervisor.status().await {
        Some(status) => json!({
            "running": true,
            "model": status.model,
            "context": status.context,
            "pid": status.pid,
            "uptime_secs": status.uptime.as_secs(),
        }),
        None => json!({ "running": false }),
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "models_available": state.config.models.len(),
        "engine": engine,
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
