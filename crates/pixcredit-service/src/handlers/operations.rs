//! Paid operation handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use pixcredit_core::{AssetRef, OperationId, OperationParams};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::gate::OperationRequest;
use crate::history::{OperationItem, OperationPage, PageRequest};
use crate::state::AppState;

/// Perform operation request.
#[derive(Debug, Deserialize)]
pub struct PerformOperationRequest {
    /// Source image (URL or data URI).
    pub image: String,
    /// Operation type and parameters.
    pub operation: OperationParams,
}

/// Perform operation response.
#[derive(Debug, Serialize)]
pub struct PerformOperationResponse {
    /// ID of the stored operation record.
    pub operation_id: OperationId,
    /// The transformed image.
    pub result_asset: AssetRef,
    /// Balance after this operation.
    pub remaining_balance: i64,
    /// Credits charged.
    pub credits_used: i64,
}

/// Run a paid image operation.
pub async fn perform_operation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PerformOperationRequest>,
) -> Result<Json<PerformOperationResponse>, ApiError> {
    let gate = state.gate.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("image operations are not configured".into())
    })?;

    if body.image.trim().is_empty() {
        return Err(ApiError::Validation("image must not be empty".into()));
    }

    let receipt = gate
        .perform(OperationRequest {
            user_id: auth.user_id,
            image: body.image,
            params: body.operation,
        })
        .await?;

    let remaining_balance = receipt.remaining_balance();
    Ok(Json(PerformOperationResponse {
        operation_id: receipt.record.id,
        result_asset: receipt.record.result_asset,
        remaining_balance,
        credits_used: receipt.credits_used,
    }))
}

/// Operation list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListOperationsQuery {
    /// 1-based page number (default: 1).
    pub page: Option<i64>,
    /// Page size (default: 10, max: 100).
    pub per_page: Option<i64>,
}

/// List the caller's operations, newest first.
pub async fn list_operations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListOperationsQuery>,
) -> Result<Json<OperationPage>, ApiError> {
    let request = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.history.list_for_user(auth.user_id, request)?))
}

fn parse_operation_id(raw: &str) -> Result<OperationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound("operation not found".into()))
}

/// Get one of the caller's operations.
pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OperationItem>, ApiError> {
    let id = parse_operation_id(&id)?;
    Ok(Json(state.history.get(auth.user_id, &id)?))
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteOperationResponse {
    /// Confirmation message.
    pub message: String,
}

/// Delete one of the caller's operations.
pub async fn delete_operation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteOperationResponse>, ApiError> {
    let id = parse_operation_id(&id)?;
    state.history.delete_operation(auth.user_id, &id).await?;

    Ok(Json(DeleteOperationResponse {
        message: "Operation deleted".to_string(),
    }))
}
