//! Error types for pixcredit storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Lookup key.
        id: String,
    },

    /// A record with the same unique key already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// The conflicting key.
        id: String,
    },

    /// The stored balance cannot cover a debit.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Stored balance.
        available: i64,
        /// Requested debit.
        required: i64,
    },

    /// The transaction is no longer pending.
    #[error("transaction not pending: {intent_ref}")]
    TransactionNotPending {
        /// Intent reference of the transaction.
        intent_ref: String,
    },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
