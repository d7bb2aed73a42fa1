//! In-memory storage implementation.
//!
//! All tables live behind one `RwLock`, so each [`Store`] method is atomic.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use pixcredit_core::{
    Account, OperationId, OperationRecord, PaymentTransaction, PendingDeduction, UserId,
};

use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, Account>,
    transactions: HashMap<String, PaymentTransaction>,
    operations: BTreeMap<OperationId, OperationRecord>,
    pending_deductions: BTreeMap<OperationId, PendingDeduction>,
}

impl Tables {
    fn debit(&mut self, user_id: &UserId, amount: i64) -> Result<i64> {
        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("account", user_id))?;

        if !account.has_sufficient_credits(amount) {
            return Err(StoreError::InsufficientCredits {
                available: account.credit_balance,
                required: amount,
            });
        }

        account.apply_debit(amount);
        Ok(account.credit_balance)
    }
}

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn create_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.write()?;
        if tables.accounts.contains_key(&account.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            });
        }
        tables.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(user_id).cloned())
    }

    fn debit_account(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        self.write()?.debit(user_id, amount)
    }

    fn create_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let mut tables = self.write()?;
        if tables.transactions.contains_key(&transaction.intent_ref) {
            return Err(StoreError::AlreadyExists {
                entity: "transaction",
                id: transaction.intent_ref.clone(),
            });
        }
        tables
            .transactions
            .insert(transaction.intent_ref.clone(), transaction.clone());
        Ok(())
    }

    fn get_transaction_by_intent(&self, intent_ref: &str) -> Result<Option<PaymentTransaction>> {
        Ok(self.read()?.transactions.get(intent_ref).cloned())
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        let tables = self.read()?;
        let mut transactions: Vec<_> = tables
            .transactions
            .values()
            .filter(|tx| tx.user_id == *user_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(transactions.into_iter().skip(offset).take(limit).collect())
    }

    fn complete_transaction(&self, intent_ref: &str) -> Result<(PaymentTransaction, i64)> {
        let mut tables = self.write()?;

        let mut transaction = tables
            .transactions
            .get(intent_ref)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transaction", intent_ref))?;

        transaction
            .complete()
            .map_err(|_| StoreError::TransactionNotPending {
                intent_ref: intent_ref.to_string(),
            })?;

        let account = tables
            .accounts
            .get_mut(&transaction.user_id)
            .ok_or_else(|| StoreError::not_found("account", transaction.user_id))?;
        account.apply_credit(transaction.credits_requested);
        let balance = account.credit_balance;

        tables
            .transactions
            .insert(intent_ref.to_string(), transaction.clone());

        Ok((transaction, balance))
    }

    fn fail_transaction(&self, intent_ref: &str) -> Result<PaymentTransaction> {
        let mut tables = self.write()?;

        let transaction = tables
            .transactions
            .get_mut(intent_ref)
            .ok_or_else(|| StoreError::not_found("transaction", intent_ref))?;

        transaction
            .fail()
            .map_err(|_| StoreError::TransactionNotPending {
                intent_ref: intent_ref.to_string(),
            })?;

        Ok(transaction.clone())
    }

    fn put_operation(&self, record: &OperationRecord) -> Result<()> {
        self.write()?.operations.insert(record.id, record.clone());
        Ok(())
    }

    fn get_operation(&self, operation_id: &OperationId) -> Result<Option<OperationRecord>> {
        Ok(self.read()?.operations.get(operation_id).cloned())
    }

    fn delete_operation(&self, operation_id: &OperationId) -> Result<()> {
        self.write()?
            .operations
            .remove(operation_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("operation", operation_id))
    }

    fn list_operations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OperationRecord>> {
        Ok(self
            .read()?
            .operations
            .values()
            .rev()
            .filter(|record| record.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_operations_by_user(&self, user_id: &UserId) -> Result<usize> {
        Ok(self
            .read()?
            .operations
            .values()
            .filter(|record| record.user_id == *user_id)
            .count())
    }

    fn put_pending_deduction(&self, pending: &PendingDeduction) -> Result<()> {
        self.write()?
            .pending_deductions
            .insert(pending.operation_id, pending.clone());
        Ok(())
    }

    fn get_pending_deduction(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<PendingDeduction>> {
        Ok(self.read()?.pending_deductions.get(operation_id).cloned())
    }

    fn list_pending_deductions(
        &self,
        after: Option<&OperationId>,
        limit: usize,
    ) -> Result<Vec<PendingDeduction>> {
        let tables = self.read()?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(tables
            .pending_deductions
            .range((lower, Bound::Unbounded))
            .map(|(_, pending)| pending.clone())
            .take(limit)
            .collect())
    }

    fn settle_pending_deduction(&self, operation_id: &OperationId) -> Result<i64> {
        let mut tables = self.write()?;

        let pending = tables
            .pending_deductions
            .get(operation_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("pending deduction", operation_id))?;

        let balance = tables.debit(&pending.user_id, pending.amount)?;
        tables.pending_deductions.remove(operation_id);

        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixcredit_core::{AssetRef, OperationParams, TransactionStatus};

    fn funded_account(store: &MemoryStore, balance: i64) -> UserId {
        let user_id = UserId::generate();
        let mut account = Account::new(user_id);
        account.credit_balance = balance;
        store.create_account(&account).unwrap();
        user_id
    }

    fn record_for(user_id: UserId) -> OperationRecord {
        OperationRecord::new(
            user_id,
            &OperationParams::Restore,
            AssetRef {
                id: "src".into(),
                url: "https://cdn.example/src.png".into(),
            },
            AssetRef {
                id: "out".into(),
                url: "https://cdn.example/out.png".into(),
            },
        )
    }

    #[test]
    fn duplicate_account_is_rejected() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 0);

        let result = store.create_account(&Account::new(user_id));
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn debit_never_goes_negative() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 5);

        assert_eq!(store.debit_account(&user_id, 5).unwrap(), 0);
        let result = store.debit_account(&user_id, 1);
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                available: 0,
                required: 1
            })
        ));

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.credit_balance, 0);
        assert_eq!(account.lifetime_used, 5);
    }

    #[test]
    fn transaction_completes_exactly_once() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 0);
        let tx = PaymentTransaction::pending(user_id, "pi_1", 50, 1000);
        store.create_transaction(&tx).unwrap();

        let (completed, balance) = store.complete_transaction("pi_1").unwrap();
        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(balance, 50);

        let again = store.complete_transaction("pi_1");
        assert!(matches!(again, Err(StoreError::TransactionNotPending { .. })));
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().credit_balance,
            50
        );
    }

    #[test]
    fn intent_reference_is_unique() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 0);
        store
            .create_transaction(&PaymentTransaction::pending(user_id, "pi_dup", 10, 200))
            .unwrap();

        let result =
            store.create_transaction(&PaymentTransaction::pending(user_id, "pi_dup", 99, 1));
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn operations_list_newest_first_per_user() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 0);
        let other = funded_account(&store, 0);

        let first = record_for(user_id);
        store.put_operation(&first).unwrap();
        let second = record_for(user_id);
        store.put_operation(&second).unwrap();
        store.put_operation(&record_for(other)).unwrap();

        let listed = store.list_operations_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 2);

        let page = store.list_operations_by_user(&user_id, 1, 1).unwrap();
        assert_eq!(page[0].id, first.id);

        store.delete_operation(&first.id).unwrap();
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 1);
        assert!(store.delete_operation(&first.id).is_err());
    }

    #[test]
    fn pending_deduction_settles_once() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 10);
        let pending = PendingDeduction::new(OperationId::generate(), user_id, 4);
        store.put_pending_deduction(&pending).unwrap();

        assert_eq!(store.settle_pending_deduction(&pending.operation_id).unwrap(), 6);
        assert!(matches!(
            store.settle_pending_deduction(&pending.operation_id),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.list_pending_deductions(None, 10).unwrap().is_empty());
    }

    #[test]
    fn underfunded_pending_deduction_stays_queued() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 1);
        let pending = PendingDeduction::new(OperationId::generate(), user_id, 4);
        store.put_pending_deduction(&pending).unwrap();

        assert!(matches!(
            store.settle_pending_deduction(&pending.operation_id),
            Err(StoreError::InsufficientCredits { .. })
        ));
        assert_eq!(store.list_pending_deductions(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn pending_deductions_page_after_cursor() {
        let store = MemoryStore::new();
        let user_id = funded_account(&store, 0);
        let queued: Vec<_> = (1..=5)
            .map(|amount| {
                let pending = PendingDeduction::new(OperationId::generate(), user_id, amount);
                store.put_pending_deduction(&pending).unwrap();
                pending
            })
            .collect();

        let first = store.list_pending_deductions(None, 2).unwrap();
        assert_eq!(first, queued[..2].to_vec());

        let rest = store
            .list_pending_deductions(Some(&first[1].operation_id), 10)
            .unwrap();
        assert_eq!(rest, queued[2..].to_vec());

        assert!(store
            .list_pending_deductions(Some(&queued[4].operation_id), 10)
            .unwrap()
            .is_empty());
    }
}
