//! Operator handlers for deferred deductions.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use pixcredit_core::PendingDeduction;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::reconcile::SweepReport;
use crate::state::AppState;

/// Pending deduction list query parameters.
#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    /// Maximum number of entries (default: 100, max: 1000).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Pending deduction list response.
#[derive(Debug, Serialize)]
pub struct PendingDeductionsResponse {
    /// Outstanding deductions, oldest first.
    pub pending: Vec<PendingDeduction>,
}

/// List deductions waiting for reconciliation.
pub async fn list_pending_deductions(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingDeductionsResponse>, ApiError> {
    let pending = state.reconciler.outstanding(query.limit.min(1000))?;
    Ok(Json(PendingDeductionsResponse { pending }))
}

/// Run a reconciliation sweep now.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<SweepReport>, ApiError> {
    tracing::info!(admin_id = %admin.admin_id, "Manual reconciliation requested");
    Ok(Json(state.reconciler.sweep()?))
}
