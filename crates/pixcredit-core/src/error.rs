//! Error types for pixcredit core types.

use crate::ids::IdError;
use crate::operation::OperationKind;
use crate::payment::TransactionStatus;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or transitioning core types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// An operation parameter failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidParams {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A credit or money amount is out of range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The catalog is missing a cost for an operation kind.
    #[error("catalog has no cost for {0}")]
    IncompleteCatalog(OperationKind),

    /// The catalog assigns a non-positive cost.
    #[error("catalog cost for {kind} must be positive, got {cost}")]
    InvalidCost {
        /// The operation kind.
        kind: OperationKind,
        /// The configured cost.
        cost: i64,
    },

    /// A transaction status change that the lifecycle forbids.
    #[error("invalid transaction transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: TransactionStatus,
        /// Requested status.
        to: TransactionStatus,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
