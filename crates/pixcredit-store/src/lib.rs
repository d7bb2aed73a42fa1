//! Storage layer for pixcredit.
//!
//! This crate persists accounts, purchase transactions, operation records and
//! deferred deductions behind the [`Store`] trait. Two backends exist:
//!
//! - [`MemoryStore`]: process-local maps, used by tests and development runs
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` with one column family
//!   per record type plus per-user index families
//!
//! # Atomicity
//!
//! Every method is atomic on its own: compound operations such as
//! [`Store::complete_transaction`] write all affected records in one batch.
//! Read-check-write sequences on an account are NOT serialized across
//! threads by the store; the service's credit ledger holds a per-user lock
//! around every balance mutation.
//!
//! # Example
//!
//! ```
//! use pixcredit_core::{Account, UserId};
//! use pixcredit_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store.create_account(&Account::new(user_id)).unwrap();
//!
//! let account = store.get_account(&user_id).unwrap().unwrap();
//! assert_eq!(account.credit_balance, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use pixcredit_core::{
    Account, OperationId, OperationRecord, PaymentTransaction, PendingDeduction, UserId,
};

/// The storage trait defining all database operations.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already has an account.
    fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// Debit an account, refusing to go below zero.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if the stored balance is too low.
    fn debit_account(&self, user_id: &UserId, amount: i64) -> Result<i64>;

    // =========================================================================
    // Purchase Transaction Operations
    // =========================================================================

    /// Insert a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the intent reference is taken.
    fn create_transaction(&self, transaction: &PaymentTransaction) -> Result<()>;

    /// Look up a transaction by its processor intent reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction_by_intent(&self, intent_ref: &str) -> Result<Option<PaymentTransaction>>;

    /// List a user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>>;

    /// Flip a pending transaction to `completed` and credit its owner in one
    /// atomic write.
    ///
    /// Returns the completed transaction and the owner's new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the transaction or account doesn't exist.
    /// - `StoreError::TransactionNotPending` if it was already completed or failed.
    fn complete_transaction(&self, intent_ref: &str) -> Result<(PaymentTransaction, i64)>;

    /// Flip a pending transaction to `failed`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the transaction doesn't exist.
    /// - `StoreError::TransactionNotPending` if it was already completed or failed.
    fn fail_transaction(&self, intent_ref: &str) -> Result<PaymentTransaction>;

    // =========================================================================
    // Operation Record Operations
    // =========================================================================

    /// Insert an operation record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_operation(&self, record: &OperationRecord) -> Result<()>;

    /// Get an operation record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_operation(&self, operation_id: &OperationId) -> Result<Option<OperationRecord>>;

    /// Delete an operation record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn delete_operation(&self, operation_id: &OperationId) -> Result<()>;

    /// List a user's operation records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_operations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OperationRecord>>;

    /// Count a user's operation records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_operations_by_user(&self, user_id: &UserId) -> Result<usize>;

    // =========================================================================
    // Deferred Deduction Operations
    // =========================================================================

    /// Insert or replace a pending deduction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_pending_deduction(&self, pending: &PendingDeduction) -> Result<()>;

    /// Get a pending deduction by operation ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_pending_deduction(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<PendingDeduction>>;

    /// List pending deductions, oldest operation first.
    ///
    /// With `after`, the listing resumes past that operation ID, so callers
    /// can page through the whole set even while entries are settled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending_deductions(
        &self,
        after: Option<&OperationId>,
        limit: usize,
    ) -> Result<Vec<PendingDeduction>>;

    /// Remove a pending deduction and debit its user in one atomic write.
    ///
    /// Returns the user's new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the deduction was already settled or the
    ///   account doesn't exist.
    /// - `StoreError::InsufficientCredits` if the stored balance is too low.
    fn settle_pending_deduction(&self, operation_id: &OperationId) -> Result<i64>;
}
