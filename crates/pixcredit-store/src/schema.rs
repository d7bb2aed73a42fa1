//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Ledger accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Purchase transactions, keyed by processor intent reference.
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, keyed by `user_id || transaction_id`.
    /// Value is the intent reference.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Operation records, keyed by `operation_id` (ULID).
    pub const OPERATIONS: &str = "operations";

    /// Index: operations by user, keyed by `user_id || operation_id`.
    /// Value is empty.
    pub const OPERATIONS_BY_USER: &str = "operations_by_user";

    /// Deferred deductions, keyed by `operation_id`.
    pub const PENDING_DEDUCTIONS: &str = "pending_deductions";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::OPERATIONS,
        cf::OPERATIONS_BY_USER,
        cf::PENDING_DEDUCTIONS,
    ]
}
