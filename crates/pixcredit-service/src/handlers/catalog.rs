//! Operation catalog handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use pixcredit_core::OperationKind;

use crate::auth::AuthUser;
use crate::state::AppState;

/// Catalog response.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    /// Credit cost per operation kind.
    pub operations: BTreeMap<OperationKind, i64>,
}

/// List paid operations and their costs.
pub async fn get_catalog(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<CatalogResponse> {
    Json(CatalogResponse {
        operations: state.config.catalog.iter().collect(),
    })
}
