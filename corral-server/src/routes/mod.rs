//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `enable_swagger = false`)
//! - Health / heartbeat route
//! - OpenAI-compatible `/v1` routes

pub mod doc;
mod health;
mod v1;

use axum::{middleware, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router());

    let mut app = Router::new().merge(api_router);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; set `enable_swagger = false` in production to avoid
    // exposing the API structure.
    if state.config.server.enable_swagger {
        let api_doc = doc::get_docs();
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
