//! Credit ledger.
//!
//! The ledger owns every mutation of a user's balance. Each user has a slot
//! guarded by its own mutex; a check-and-mutate sequence runs entirely inside
//! that lock, so two requests for the same user never interleave between the
//! balance read and the write. Different users only share the brief lookup in
//! the slot map.
//!
//! # Holds
//!
//! A paid operation deducts only after its external effect succeeded, but
//! two concurrent operations must not both be admitted against a balance
//! that covers one. [`CreditLedger::reserve`] therefore places an in-memory
//! hold: later checks see `available = balance - held`. The hold is released
//! when the [`CreditHold`] is dropped, or turned into the real deduction by
//! [`CreditLedger::settle`].
//!
//! Holds are not persisted; a restart drops them together with the requests
//! that owned them.
//!
//! A slot lives in the map only while something uses it: the last reference
//! with nothing held removes it, so the map tracks in-flight users rather
//! than every user ever seen.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pixcredit_core::{Account, OperationId, PaymentTransaction, PendingDeduction, UserId};
use pixcredit_store::{Store, StoreError};

/// Errors returned by the credit ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The user has no ledger account.
    #[error("account not found: {0}")]
    AccountNotFound(UserId),

    /// The user already has a ledger account.
    #[error("account already exists: {0}")]
    AccountExists(UserId),

    /// Available credits cannot cover the request.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Credits the request needs.
        required: i64,
        /// Credits available (balance minus holds).
        available: i64,
    },

    /// Amounts must be strictly positive.
    #[error("invalid credit amount: {0}")]
    InvalidAmount(i64),

    /// The transaction is unknown or no longer pending.
    #[error("transaction not pending: {0}")]
    TransactionNotPending(String),

    /// The deferred deduction was already settled.
    #[error("pending deduction already settled: {0}")]
    AlreadySettled(OperationId),

    /// Storage failure.
    #[error(transparent)]
    Store(StoreError),
}

type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Default)]
struct UserSlot {
    held: i64,
}

type SharedSlot = Arc<Mutex<UserSlot>>;

type SlotMap = Mutex<HashMap<UserId, SharedSlot>>;

fn lock(slot: &Mutex<UserSlot>) -> MutexGuard<'_, UserSlot> {
    // The slot only holds an integer; a panic elsewhere cannot leave it torn.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_map(slots: &SlotMap) -> MutexGuard<'_, HashMap<UserId, SharedSlot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop `slot` from the map if the map and the caller are its only owners and
/// nothing is held. New references are only handed out under the map lock,
/// so the count cannot grow while it is checked.
fn prune_idle(slots: &SlotMap, user_id: UserId, slot: &SharedSlot) {
    let mut map = lock_map(slots);
    let is_current = map.get(&user_id).is_some_and(|s| Arc::ptr_eq(s, slot));
    if is_current && Arc::strong_count(slot) == 2 && lock(slot).held == 0 {
        map.remove(&user_id);
    }
}

/// A borrowed slot that prunes itself from the map when released.
struct SlotRef<'a> {
    slots: &'a SlotMap,
    user_id: UserId,
    slot: SharedSlot,
}

impl Deref for SlotRef<'_> {
    type Target = Mutex<UserSlot>;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        prune_idle(self.slots, self.user_id, &self.slot);
    }
}

/// Credits set aside for an in-flight paid operation.
///
/// Dropping the hold releases it. Pass it to [`CreditLedger::settle`] to turn
/// it into a deduction.
#[derive(Debug)]
#[must_use = "dropping a hold releases the reserved credits"]
pub struct CreditHold {
    user_id: UserId,
    amount: i64,
    slot: SharedSlot,
    slots: Arc<SlotMap>,
}

impl CreditHold {
    /// The user the credits are held for.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Credits held.
    #[must_use]
    pub fn amount(&self) -> i64 {
        self.amount
    }
}

impl Drop for CreditHold {
    fn drop(&mut self) {
        if self.amount > 0 {
            lock(&self.slot).held -= self.amount;
            tracing::debug!(user_id = %self.user_id, amount = self.amount, "Credit hold released");
        }
        prune_idle(&self.slots, self.user_id, &self.slot);
    }
}

/// Per-user serialized view over account balances.
pub struct CreditLedger {
    store: Arc<dyn Store>,
    slots: Arc<SlotMap>,
}

impl CreditLedger {
    /// Create a ledger over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slot(&self, user_id: UserId) -> SlotRef<'_> {
        let slot = Arc::clone(lock_map(&self.slots).entry(user_id).or_default());
        SlotRef {
            slots: &self.slots,
            user_id,
            slot,
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        lock_map(&self.slots).len()
    }

    fn load_account(&self, user_id: UserId) -> Result<Account> {
        self.store
            .get_account(&user_id)
            .map_err(LedgerError::Store)?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn available(&self, user_id: UserId, slot: &UserSlot) -> Result<i64> {
        Ok(self.load_account(user_id)?.credit_balance - slot.held)
    }

    /// Create a zero-balance account.
    ///
    /// # Errors
    ///
    /// `AccountExists` if the user already has one.
    pub fn open_account(&self, user_id: UserId) -> Result<Account> {
        let account = Account::new(user_id);
        self.store.create_account(&account).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => LedgerError::AccountExists(user_id),
            other => LedgerError::Store(other),
        })?;

        tracing::info!(user_id = %user_id, "Ledger account opened");
        Ok(account)
    }

    /// Fetch a user's account.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` if the user has no account.
    pub fn account(&self, user_id: UserId) -> Result<Account> {
        self.load_account(user_id)
    }

    /// Current stored balance.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` if the user has no account.
    pub fn balance(&self, user_id: UserId) -> Result<i64> {
        Ok(self.load_account(user_id)?.credit_balance)
    }

    /// Read-only comparison of available credits against `required`.
    ///
    /// Returns the available credits.
    ///
    /// # Errors
    ///
    /// `InsufficientCredits` when the balance minus holds is below `required`.
    pub fn check(&self, user_id: UserId, required: i64) -> Result<i64> {
        let slot = self.slot(user_id);
        let guard = lock(&slot);

        let available = self.available(user_id, &guard)?;
        if available < required {
            return Err(LedgerError::InsufficientCredits {
                required,
                available,
            });
        }
        Ok(available)
    }

    /// Atomically re-validate and deduct `amount`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// `InsufficientCredits` when the balance minus holds is below `amount`.
    pub fn deduct(&self, user_id: UserId, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let slot = self.slot(user_id);
        let guard = lock(&slot);

        let available = self.available(user_id, &guard)?;
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }

        let balance = self
            .store
            .debit_account(&user_id, amount)
            .map_err(LedgerError::Store)?;

        tracing::info!(user_id = %user_id, amount, balance, "Credits deducted");
        Ok(balance)
    }

    /// Check and hold `amount` credits for an in-flight operation.
    ///
    /// # Errors
    ///
    /// `InsufficientCredits` when the balance minus existing holds is below
    /// `amount`.
    pub fn reserve(&self, user_id: UserId, amount: i64) -> Result<CreditHold> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let slot = self.slot(user_id);
        {
            let mut guard = lock(&slot);
            let available = self.available(user_id, &guard)?;
            if available < amount {
                return Err(LedgerError::InsufficientCredits {
                    required: amount,
                    available,
                });
            }
            guard.held += amount;
        }

        tracing::debug!(user_id = %user_id, amount, "Credit hold placed");
        Ok(CreditHold {
            user_id,
            amount,
            slot: Arc::clone(&slot.slot),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Turn a hold into a deduction. Returns the new balance.
    ///
    /// The hold is released whether or not the deduction succeeds.
    ///
    /// # Errors
    ///
    /// Storage failures, or `InsufficientCredits` if the stored balance
    /// dropped below the held amount.
    pub fn settle(&self, mut hold: CreditHold) -> Result<i64> {
        let user_id = hold.user_id;
        let amount = hold.amount;

        let mut guard = lock(&hold.slot);
        guard.held -= amount;
        let result = self.store.debit_account(&user_id, amount);
        drop(guard);
        hold.amount = 0;

        match result {
            Ok(balance) => {
                tracing::info!(user_id = %user_id, amount, balance, "Held credits deducted");
                Ok(balance)
            }
            Err(StoreError::InsufficientCredits {
                available,
                required,
            }) => Err(LedgerError::InsufficientCredits {
                required,
                available,
            }),
            Err(e) => Err(LedgerError::Store(e)),
        }
    }

    /// Flip a pending purchase to `completed` and credit its owner.
    ///
    /// Runs under the owner's lock, so concurrent confirmations of the same
    /// intent credit at most once. Returns the completed transaction and the
    /// new balance.
    ///
    /// # Errors
    ///
    /// `TransactionNotPending` if the transaction is unknown or was already
    /// completed or failed.
    pub fn credit(&self, transaction: &PaymentTransaction) -> Result<(PaymentTransaction, i64)> {
        if transaction.credits_requested <= 0 {
            return Err(LedgerError::InvalidAmount(transaction.credits_requested));
        }

        let slot = self.slot(transaction.user_id);
        let _guard = lock(&slot);

        let (completed, balance) = self
            .store
            .complete_transaction(&transaction.intent_ref)
            .map_err(|e| not_pending(e, &transaction.intent_ref))?;

        tracing::info!(
            user_id = %completed.user_id,
            intent_ref = %completed.intent_ref,
            credits = completed.credits_requested,
            balance,
            "Purchase credited"
        );
        Ok((completed, balance))
    }

    /// Flip a pending purchase to `failed`.
    ///
    /// # Errors
    ///
    /// `TransactionNotPending` if the transaction is unknown or was already
    /// completed or failed.
    pub fn decline(&self, transaction: &PaymentTransaction) -> Result<PaymentTransaction> {
        let slot = self.slot(transaction.user_id);
        let _guard = lock(&slot);

        let failed = self
            .store
            .fail_transaction(&transaction.intent_ref)
            .map_err(|e| not_pending(e, &transaction.intent_ref))?;

        tracing::info!(
            user_id = %failed.user_id,
            intent_ref = %failed.intent_ref,
            "Purchase marked failed"
        );
        Ok(failed)
    }

    /// Settle a deferred deduction. Returns the new balance.
    ///
    /// The pending entry is removed in the same write as the debit, so a
    /// deduction is charged at most once however many retries race. Credits
    /// held for in-flight operations are not available to it. A failed
    /// attempt is counted on the stored entry.
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if another attempt won, `InsufficientCredits` when
    /// the balance minus holds is below the amount, otherwise the debit
    /// failure.
    pub fn settle_pending(&self, pending: &PendingDeduction) -> Result<i64> {
        let slot = self.slot(pending.user_id);
        let guard = lock(&slot);

        let available = self.available(pending.user_id, &guard)?;
        if available < pending.amount {
            let outstanding = self
                .store
                .get_pending_deduction(&pending.operation_id)
                .map_err(LedgerError::Store)?;
            if outstanding.is_none() {
                return Err(LedgerError::AlreadySettled(pending.operation_id));
            }
            self.count_failed_attempt(&pending.operation_id);
            return Err(LedgerError::InsufficientCredits {
                required: pending.amount,
                available,
            });
        }

        match self.store.settle_pending_deduction(&pending.operation_id) {
            Ok(balance) => {
                tracing::info!(
                    user_id = %pending.user_id,
                    operation_id = %pending.operation_id,
                    amount = pending.amount,
                    balance,
                    "Deferred deduction settled"
                );
                Ok(balance)
            }
            Err(StoreError::NotFound {
                entity: "pending deduction",
                ..
            }) => Err(LedgerError::AlreadySettled(pending.operation_id)),
            Err(e) => {
                self.count_failed_attempt(&pending.operation_id);
                Err(match e {
                    StoreError::InsufficientCredits {
                        available,
                        required,
                    } => LedgerError::InsufficientCredits {
                        required,
                        available,
                    },
                    other => LedgerError::Store(other),
                })
            }
        }
    }

    // Caller holds the user's lock.
    fn count_failed_attempt(&self, operation_id: &OperationId) {
        let updated = self
            .store
            .get_pending_deduction(operation_id)
            .and_then(|current| match current {
                Some(mut current) => {
                    current.attempts += 1;
                    self.store.put_pending_deduction(&current)
                }
                None => Ok(()),
            });

        if let Err(e) = updated {
            tracing::warn!(
                operation_id = %operation_id,
                error = %e,
                "Failed to record deduction attempt"
            );
        }
    }
}

fn not_pending(err: StoreError, intent_ref: &str) -> LedgerError {
    match err {
        StoreError::TransactionNotPending { .. }
        | StoreError::NotFound {
            entity: "transaction",
            ..
        } => LedgerError::TransactionNotPending(intent_ref.to_string()),
        other => LedgerError::Store(other),
    }
}
