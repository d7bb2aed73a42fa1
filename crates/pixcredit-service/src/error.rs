//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use pixcredit_store::StoreError;

use crate::gate::GateError;
use crate::history::HistoryError;
use crate::ledger::LedgerError;
use crate::payments::PaymentError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request parameters failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Not enough available credits for a paid operation.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Cost of the operation.
        required: i64,
        /// Credits available.
        available: i64,
    },

    /// An external collaborator failed. The detail is logged, never returned.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// A collaborator is not configured on this deployment.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// Body of a 403 for insufficient credits.
#[derive(Debug, Serialize)]
struct InsufficientCreditsResponse {
    message: String,
    required: i64,
    available: i64,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "unauthorized".to_string(),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::InsufficientCredits {
                required,
                available,
            } => {
                let body = InsufficientCreditsResponse {
                    message: format!(
                        "Insufficient credits. This operation requires {required} credits. \
                         You have {available} credits."
                    ),
                    required,
                    available,
                    code: "insufficient_credits",
                };
                return (StatusCode::FORBIDDEN, Json(body)).into_response();
            }
            Self::ExternalService(msg) => {
                tracing::error!(error = %msg, "External service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    "An upstream service failed. Please try again later.".to_string(),
                )
            }
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => Self::NotFound(format!("{entity} not found")),
            StoreError::AlreadyExists { entity, .. } => {
                Self::Conflict(format!("{entity} already exists"))
            }
            StoreError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            StoreError::TransactionNotPending { .. } => Self::NotFound("not found".to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(_) => Self::NotFound("account not found".to_string()),
            LedgerError::AccountExists(_) => Self::Conflict("account already exists".to_string()),
            LedgerError::InsufficientCredits {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            LedgerError::InvalidAmount(amount) => {
                Self::Validation(format!("credit amount must be positive, got {amount}"))
            }
            LedgerError::TransactionNotPending(_) => Self::NotFound("not found".to_string()),
            LedgerError::AlreadySettled(id) => {
                Self::Conflict(format!("pending deduction {id} already settled"))
            }
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Validation(e) => Self::Validation(e.to_string()),
            GateError::InsufficientCredits {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            GateError::Provider(e) => Self::ExternalService(e.to_string()),
            GateError::Record(e) => Self::Internal(format!("failed to record operation: {e}")),
            GateError::Ledger(e) => e.into(),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Invalid(msg) => Self::Validation(msg),
            PaymentError::NotConfigured => {
                Self::ServiceUnavailable("payments are not configured".to_string())
            }
            PaymentError::Processor(e) => Self::ExternalService(e.to_string()),
            PaymentError::NotFound => Self::NotFound("not found".to_string()),
            PaymentError::Ledger(e) => e.into(),
            PaymentError::Store(e) => e.into(),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound => Self::NotFound("operation not found".to_string()),
            HistoryError::Store(e) => e.into(),
        }
    }
}
