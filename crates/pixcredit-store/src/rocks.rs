//! `RocksDB` storage implementation.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use pixcredit_core::{
    Account, OperationId, OperationRecord, PaymentTransaction, PendingDeduction, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

type KeyValue = (Box<[u8]>, Box<[u8]>);

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!("RocksDB store opened");
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// All entries under `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn require_account(&self, user_id: &UserId) -> Result<Account> {
        self.get_account(user_id)?
            .ok_or_else(|| StoreError::not_found("account", user_id))
    }

    fn debited(&self, user_id: &UserId, amount: i64) -> Result<Account> {
        let mut account = self.require_account(user_id)?;
        if !account.has_sufficient_credits(amount) {
            return Err(StoreError::InsufficientCredits {
                available: account.credit_balance,
                required: amount,
            });
        }
        account.apply_debit(amount);
        Ok(account)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn create_account(&self, account: &Account) -> Result<()> {
        if self.get_account(&account.user_id)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            });
        }

        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(&account.user_id), Self::serialize(account)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn debit_account(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        let account = self.debited(user_id, amount)?;

        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(user_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(account.credit_balance)
    }

    // =========================================================================
    // Purchase Transaction Operations
    // =========================================================================

    fn create_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        if self
            .get_transaction_by_intent(&transaction.intent_ref)?
            .is_some()
        {
            return Err(StoreError::AlreadyExists {
                entity: "transaction",
                id: transaction.intent_ref.clone(),
            });
        }

        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&transaction.intent_ref),
            Self::serialize(transaction)?,
        );
        batch.put_cf(
            &cf_by_user,
            keys::user_transaction_key(&transaction.user_id, &transaction.id),
            transaction.intent_ref.as_bytes(),
        );
        self.write(batch)
    }

    fn get_transaction_by_intent(&self, intent_ref: &str) -> Result<Option<PaymentTransaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(intent_ref))
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        let entries = self.scan_prefix(cf::TRANSACTIONS_BY_USER, &keys::user_prefix(user_id))?;

        let mut transactions = Vec::new();
        for (_, intent_ref) in entries.iter().rev().skip(offset).take(limit) {
            if let Some(tx) = self.get(cf::TRANSACTIONS, intent_ref)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    fn complete_transaction(&self, intent_ref: &str) -> Result<(PaymentTransaction, i64)> {
        let mut transaction = self
            .get_transaction_by_intent(intent_ref)?
            .ok_or_else(|| StoreError::not_found("transaction", intent_ref))?;

        transaction
            .complete()
            .map_err(|_| StoreError::TransactionNotPending {
                intent_ref: intent_ref.to_string(),
            })?;

        let mut account = self.require_account(&transaction.user_id)?;
        account.apply_credit(transaction.credits_requested);

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.user_id),
            Self::serialize(&account)?,
        );
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(intent_ref),
            Self::serialize(&transaction)?,
        );
        self.write(batch)?;

        Ok((transaction, account.credit_balance))
    }

    fn fail_transaction(&self, intent_ref: &str) -> Result<PaymentTransaction> {
        let mut transaction = self
            .get_transaction_by_intent(intent_ref)?
            .ok_or_else(|| StoreError::not_found("transaction", intent_ref))?;

        transaction
            .fail()
            .map_err(|_| StoreError::TransactionNotPending {
                intent_ref: intent_ref.to_string(),
            })?;

        let cf = self.cf(cf::TRANSACTIONS)?;
        self.db
            .put_cf(
                &cf,
                keys::transaction_key(intent_ref),
                Self::serialize(&transaction)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(transaction)
    }

    // =========================================================================
    // Operation Record Operations
    // =========================================================================

    fn put_operation(&self, record: &OperationRecord) -> Result<()> {
        let cf_ops = self.cf(cf::OPERATIONS)?;
        let cf_by_user = self.cf(cf::OPERATIONS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_ops,
            keys::operation_key(&record.id),
            Self::serialize(record)?,
        );
        batch.put_cf(
            &cf_by_user,
            keys::user_operation_key(&record.user_id, &record.id),
            [],
        );
        self.write(batch)
    }

    fn get_operation(&self, operation_id: &OperationId) -> Result<Option<OperationRecord>> {
        self.get(cf::OPERATIONS, &keys::operation_key(operation_id))
    }

    fn delete_operation(&self, operation_id: &OperationId) -> Result<()> {
        let record = self
            .get_operation(operation_id)?
            .ok_or_else(|| StoreError::not_found("operation", operation_id))?;

        let cf_ops = self.cf(cf::OPERATIONS)?;
        let cf_by_user = self.cf(cf::OPERATIONS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_ops, keys::operation_key(operation_id));
        batch.delete_cf(
            &cf_by_user,
            keys::user_operation_key(&record.user_id, operation_id),
        );
        self.write(batch)
    }

    fn list_operations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OperationRecord>> {
        let entries = self.scan_prefix(cf::OPERATIONS_BY_USER, &keys::user_prefix(user_id))?;

        let mut records = Vec::new();
        for (key, _) in entries.iter().rev().skip(offset).take(limit) {
            let Some(operation_id) = keys::operation_id_from_user_key(key) else {
                tracing::warn!(key_len = key.len(), "Skipping malformed operation index key");
                continue;
            };
            if let Some(record) = self.get_operation(&operation_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn count_operations_by_user(&self, user_id: &UserId) -> Result<usize> {
        Ok(self
            .scan_prefix(cf::OPERATIONS_BY_USER, &keys::user_prefix(user_id))?
            .len())
    }

    // =========================================================================
    // Deferred Deduction Operations
    // =========================================================================

    fn put_pending_deduction(&self, pending: &PendingDeduction) -> Result<()> {
        let cf = self.cf(cf::PENDING_DEDUCTIONS)?;
        self.db
            .put_cf(
                &cf,
                keys::pending_deduction_key(&pending.operation_id),
                Self::serialize(pending)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_pending_deduction(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<PendingDeduction>> {
        self.get(
            cf::PENDING_DEDUCTIONS,
            &keys::pending_deduction_key(operation_id),
        )
    }

    fn list_pending_deductions(
        &self,
        after: Option<&OperationId>,
        limit: usize,
    ) -> Result<Vec<PendingDeduction>> {
        let cf = self.cf(cf::PENDING_DEDUCTIONS)?;
        let start = after.map(keys::pending_deduction_key);
        let mode = match &start {
            Some(key) => IteratorMode::From(key.as_slice(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut pending = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            if pending.len() == limit {
                break;
            }
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if start.as_deref() == Some(&*key) {
                continue;
            }
            pending.push(Self::deserialize(&value)?);
        }
        Ok(pending)
    }

    fn settle_pending_deduction(&self, operation_id: &OperationId) -> Result<i64> {
        let key = keys::pending_deduction_key(operation_id);
        let pending = self
            .get_pending_deduction(operation_id)?
            .ok_or_else(|| StoreError::not_found("pending deduction", operation_id))?;

        let account = self.debited(&pending.user_id, pending.amount)?;

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_pending = self.cf(cf::PENDING_DEDUCTIONS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.user_id),
            Self::serialize(&account)?,
        );
        batch.delete_cf(&cf_pending, key);
        self.write(batch)?;

        Ok(account.credit_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixcredit_core::{AssetRef, OperationParams, TransactionStatus};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            id: id.into(),
            url: format!("https://cdn.example/{id}.png"),
        }
    }

    #[test]
    fn account_debit() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let mut account = Account::new(user_id);
        account.credit_balance = 10;
        store.create_account(&account).unwrap();

        assert_eq!(store.debit_account(&user_id, 4).unwrap(), 6);
        assert!(matches!(
            store.debit_account(&user_id, 7),
            Err(StoreError::InsufficientCredits {
                available: 6,
                required: 7
            })
        ));

        let stored = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(stored.credit_balance, 6);
        assert_eq!(stored.lifetime_used, 4);
    }

    #[test]
    fn transaction_lifecycle() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.create_account(&Account::new(user_id)).unwrap();

        let tx1 = PaymentTransaction::pending(user_id, "pi_1", 10, 200);
        store.create_transaction(&tx1).unwrap();
        let tx2 = PaymentTransaction::pending(user_id, "pi_2", 50, 1000);
        store.create_transaction(&tx2).unwrap();

        let (completed, balance) = store.complete_transaction("pi_2").unwrap();
        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(balance, 50);
        assert!(store.complete_transaction("pi_2").is_err());

        let failed = store.fail_transaction("pi_1").unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);

        let listed = store.list_transactions_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].intent_ref, "pi_2");
        assert_eq!(listed[1].intent_ref, "pi_1");

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.lifetime_purchased, 50);
    }

    #[test]
    fn operation_index() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let first =
            OperationRecord::new(user_id, &OperationParams::Restore, asset("a"), asset("b"));
        store.put_operation(&first).unwrap();
        let second =
            OperationRecord::new(user_id, &OperationParams::Restore, asset("c"), asset("d"));
        store.put_operation(&second).unwrap();

        let listed = store.list_operations_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);

        store.delete_operation(&second.id).unwrap();
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 1);
        assert!(store.get_operation(&second.id).unwrap().is_none());
    }

    #[test]
    fn pending_deduction_settlement() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let mut account = Account::new(user_id);
        account.credit_balance = 5;
        store.create_account(&account).unwrap();

        let pending = PendingDeduction::new(OperationId::generate(), user_id, 5);
        store.put_pending_deduction(&pending).unwrap();
        assert_eq!(store.list_pending_deductions(None, 10).unwrap(), vec![pending.clone()]);

        assert_eq!(store.settle_pending_deduction(&pending.operation_id).unwrap(), 0);
        assert!(store.list_pending_deductions(None, 10).unwrap().is_empty());
    }

    #[test]
    fn pending_deductions_resume_past_cursor() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.create_account(&Account::new(user_id)).unwrap();

        let queued: Vec<_> = (1..=3)
            .map(|amount| {
                let pending = PendingDeduction::new(OperationId::generate(), user_id, amount);
                store.put_pending_deduction(&pending).unwrap();
                pending
            })
            .collect();

        let page = store
            .list_pending_deductions(Some(&queued[0].operation_id), 1)
            .unwrap();
        assert_eq!(page, vec![queued[1].clone()]);

        let page = store
            .list_pending_deductions(Some(&queued[1].operation_id), 10)
            .unwrap();
        assert_eq!(page, vec![queued[2].clone()]);
    }
}
