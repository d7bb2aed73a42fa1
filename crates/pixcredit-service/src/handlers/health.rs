//! Health check handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Whether a transform provider is wired in.
    pub operations_enabled: bool,
    /// Whether a payment processor is wired in.
    pub purchases_enabled: bool,
}

/// Liveness plus which paid surfaces this deployment serves.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pixcredit",
        version: env!("CARGO_PKG_VERSION"),
        operations_enabled: state.has_provider(),
        purchases_enabled: state.tracker.accepts_purchases(),
    })
}
