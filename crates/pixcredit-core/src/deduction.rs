//! Deferred deductions.
//!
//! When a paid operation succeeded but its deduction could not be written,
//! the debt is persisted here and settled later by the reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OperationId, UserId};

/// A deduction owed for an operation whose effect already happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeduction {
    /// The operation the credits are owed for. At most one entry per operation.
    pub operation_id: OperationId,

    /// The user to charge.
    pub user_id: UserId,

    /// Credits to deduct.
    pub amount: i64,

    /// Settlement attempts so far.
    pub attempts: u32,

    /// When the deduction was deferred.
    pub created_at: DateTime<Utc>,
}

impl PendingDeduction {
    /// Create a pending deduction for an operation.
    #[must_use]
    pub fn new(operation_id: OperationId, user_id: UserId, amount: i64) -> Self {
        Self {
            operation_id,
            user_id,
            amount,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}
