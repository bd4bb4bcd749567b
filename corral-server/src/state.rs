//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use corral_core::{GatewayConfig, Selector, Supervisor};
use tokio::sync::Mutex;

use crate::dump::DumpWriter;

/// State shared across all HTTP handlers.
pub struct AppState {
    /// The immutable configuration tree.
    pub config: Arc<GatewayConfig>,
    /// Owner of the single live engine.
    pub supervisor: Supervisor,
    /// Variant selection per request.
    pub selector: Selector,
    /// Global request lock: at most one inference request is in flight
    /// end-to-end. Idle-timer health probes do not take it.
    pub request_lock: Arc<Mutex<()>>,
    /// Request/response dump facility, when configured.
    pub dumps: Option<DumpWriter>,
}

impl AppState {
    pub fn new(config: Arc<GatewayConfig>, dumps: Option<DumpWriter>) -> Self {
        let supervisor = Supervisor::new();
        let selector = Selector::new(Arc::clone(&config), supervisor.clone());
        Self {
            config,
            supervisor,
            selector,
            request_lock: Arc::new(Mutex::new(())),
            dumps,
        }
    }
}
