//! Paid operation orchestration.
//!
//! One call to [`OperationGate::perform`] walks these stages:
//!
//! ```text
//! CHECKING ──> CHECKED ──> EXTERNAL_CALL ──> RECORDING ──> DEDUCTING ──> DONE
//!    │                          │
//!    └──> REJECTED              └──> FAILED
//! ```
//!
//! Credits are held at CHECKING and deducted at DEDUCTING, after the
//! transform and the record write both succeeded. A failure before that
//! releases the hold and charges nothing.

use std::fmt;
use std::sync::Arc;

use pixcredit_core::{
    AssetRef, CoreError, OperationCatalog, OperationParams, OperationRecord, PendingDeduction,
    UserId,
};
use pixcredit_store::{Store, StoreError};

use crate::ledger::{CreditLedger, LedgerError};
use crate::provider::{ProviderError, TransformProvider, TransformRequest};
use crate::reconcile::spawn_settle_retry;

/// Stage of a paid operation, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    /// Holding credits.
    Checking,
    /// Credits held.
    Checked,
    /// Waiting on the transform provider.
    ExternalCall,
    /// Writing the operation record.
    Recording,
    /// Deducting the held credits.
    Deducting,
    /// Finished.
    Done,
    /// Refused for lack of credits.
    Rejected,
    /// The transform failed.
    Failed,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Checking => "CHECKING",
            Self::Checked => "CHECKED",
            Self::ExternalCall => "EXTERNAL_CALL",
            Self::Recording => "RECORDING",
            Self::Deducting => "DEDUCTING",
            Self::Done => "DONE",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        })
    }
}

/// Errors returned by the gate. None of them leaves a charge behind.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Parameters failed validation.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// Not enough available credits.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Cost of the operation.
        required: i64,
        /// Credits available at check time.
        available: i64,
    },

    /// The transform provider failed.
    #[error("transform provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The record could not be written after the transform succeeded.
    #[error("failed to record operation: {0}")]
    Record(StoreError),

    /// Ledger failure while checking.
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for GateError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            other => Self::Ledger(other),
        }
    }
}

/// A paid operation request.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// The paying user.
    pub user_id: UserId,
    /// Source image reference.
    pub image: String,
    /// Operation parameters (validated by the gate).
    pub params: OperationParams,
}

/// How the operation's credits were charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Deducted in line.
    Deducted {
        /// Balance after the deduction.
        balance: i64,
    },
    /// Deduction failed and was queued for reconciliation.
    Deferred {
        /// Balance once the queued deduction lands.
        expected_balance: i64,
    },
}

/// Result of a successful paid operation.
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    /// The stored record.
    pub record: OperationRecord,
    /// Credits charged.
    pub credits_used: i64,
    /// How the charge was applied.
    pub settlement: Settlement,
}

impl OperationReceipt {
    /// Balance to report to the caller.
    #[must_use]
    pub fn remaining_balance(&self) -> i64 {
        match self.settlement {
            Settlement::Deducted { balance } => balance,
            Settlement::Deferred { expected_balance } => expected_balance,
        }
    }
}

/// Gates paid operations behind the credit ledger.
pub struct OperationGate {
    ledger: Arc<CreditLedger>,
    store: Arc<dyn Store>,
    provider: Arc<dyn TransformProvider>,
    catalog: OperationCatalog,
}

impl OperationGate {
    /// Create a gate.
    #[must_use]
    pub fn new(
        ledger: Arc<CreditLedger>,
        store: Arc<dyn Store>,
        provider: Arc<dyn TransformProvider>,
        catalog: OperationCatalog,
    ) -> Self {
        Self {
            ledger,
            store,
            provider,
            catalog,
        }
    }

    /// Run one paid operation end to end.
    ///
    /// # Errors
    ///
    /// See [`GateError`]. Every error leaves the balance untouched.
    pub async fn perform(&self, request: OperationRequest) -> Result<OperationReceipt, GateError> {
        let OperationRequest {
            user_id,
            image,
            params,
        } = request;
        let params = params.normalized()?;
        let kind = params.kind();
        let cost = self.catalog.cost(kind);

        tracing::debug!(
            user_id = %user_id,
            kind = %kind,
            cost,
            stage = %GateStage::Checking,
            "Holding credits"
        );
        let hold = self.ledger.reserve(user_id, cost).map_err(|e| {
            tracing::info!(
                user_id = %user_id,
                kind = %kind,
                stage = %GateStage::Rejected,
                error = %e,
                "Operation rejected"
            );
            GateError::from(e)
        })?;
        tracing::debug!(
            user_id = %user_id,
            kind = %kind,
            stage = %GateStage::ExternalCall,
            "Credits held, calling provider"
        );
        let transform = TransformRequest {
            kind,
            source: image,
            params: params.clone(),
        };
        let output = self.provider.transform(&transform).await.map_err(|e| {
            tracing::warn!(
                user_id = %user_id,
                kind = %kind,
                stage = %GateStage::Failed,
                error = %e,
                "Transform failed"
            );
            GateError::from(e)
        })?;

        let record =
            OperationRecord::new(user_id, &params, output.source_asset, output.result_asset);
        if let Err(e) = self.store.put_operation(&record) {
            log_orphaned_assets(user_id, &record.source_asset, &record.result_asset, &e);
            return Err(GateError::Record(e));
        }

        tracing::debug!(
            user_id = %user_id,
            operation_id = %record.id,
            stage = %GateStage::Deducting,
            "Operation recorded"
        );
        let settlement = match self.ledger.settle(hold) {
            Ok(balance) => Settlement::Deducted { balance },
            Err(e) => self.defer_deduction(&record, cost, &e),
        };

        tracing::info!(
            user_id = %user_id,
            operation_id = %record.id,
            kind = %kind,
            credits_used = cost,
            stage = %GateStage::Done,
            "Paid operation completed"
        );

        Ok(OperationReceipt {
            record,
            credits_used: cost,
            settlement,
        })
    }

    /// The transform and record already happened; the user still owes `cost`.
    fn defer_deduction(
        &self,
        record: &OperationRecord,
        cost: i64,
        cause: &LedgerError,
    ) -> Settlement {
        tracing::error!(
            user_id = %record.user_id,
            operation_id = %record.id,
            amount = cost,
            error = %cause,
            "Internal inconsistency: deduction failed after a completed operation"
        );

        let pending = PendingDeduction::new(record.id, record.user_id, cost);
        match self.store.put_pending_deduction(&pending) {
            Ok(()) => {
                spawn_settle_retry(Arc::clone(&self.ledger), pending);
            }
            Err(e) => {
                tracing::error!(
                    user_id = %record.user_id,
                    operation_id = %record.id,
                    amount = cost,
                    error = %e,
                    "Failed to queue deferred deduction; debt is unrecorded"
                );
            }
        }

        let expected_balance = self
            .ledger
            .balance(record.user_id)
            .map_or(0, |balance| (balance - cost).max(0));
        Settlement::Deferred { expected_balance }
    }
}

fn log_orphaned_assets(user_id: UserId, source: &AssetRef, result: &AssetRef, cause: &StoreError) {
    tracing::error!(
        user_id = %user_id,
        source_asset_id = %source.id,
        source_asset_url = %source.url,
        result_asset_id = %result.id,
        result_asset_url = %result.url,
        stage = %GateStage::Recording,
        error = %cause,
        "Operation record write failed; provider assets orphaned"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TransformOutput;
    use async_trait::async_trait;
    use pixcredit_core::{Account, AspectRatio, OperationId, OperationKind, PaymentTransaction};
    use pixcredit_store::{MemoryStore, Result as StoreResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeProvider {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl TransformProvider for FakeProvider {
        async fn transform(
            &self,
            request: &TransformRequest,
        ) -> Result<TransformOutput, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(ProviderError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(TransformOutput {
                source_asset: AssetRef {
                    id: format!("src-{n}"),
                    url: request.source.clone(),
                },
                result_asset: AssetRef {
                    id: format!("out-{n}"),
                    url: format!("https://cdn.example/out-{n}.png"),
                },
            })
        }

        async fn delete_asset(&self, _asset: &AssetRef) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    /// Memory store whose operation writes or plain debits can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_put_operation: AtomicBool,
        fail_debit: AtomicBool,
    }

    fn unavailable() -> StoreError {
        StoreError::Database("disk unavailable".into())
    }

    impl Store for FlakyStore {
        fn create_account(&self, account: &Account) -> StoreResult<()> {
            self.inner.create_account(account)
        }

        fn get_account(&self, user_id: &UserId) -> StoreResult<Option<Account>> {
            self.inner.get_account(user_id)
        }

        fn debit_account(&self, user_id: &UserId, amount: i64) -> StoreResult<i64> {
            if self.fail_debit.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.debit_account(user_id, amount)
        }

        fn create_transaction(&self, tx: &PaymentTransaction) -> StoreResult<()> {
            self.inner.create_transaction(tx)
        }

        fn get_transaction_by_intent(
            &self,
            intent_ref: &str,
        ) -> StoreResult<Option<PaymentTransaction>> {
            self.inner.get_transaction_by_intent(intent_ref)
        }

        fn list_transactions_by_user(
            &self,
            user_id: &UserId,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<PaymentTransaction>> {
            self.inner.list_transactions_by_user(user_id, limit, offset)
        }

        fn complete_transaction(
            &self,
            intent_ref: &str,
        ) -> StoreResult<(PaymentTransaction, i64)> {
            self.inner.complete_transaction(intent_ref)
        }

        fn fail_transaction(&self, intent_ref: &str) -> StoreResult<PaymentTransaction> {
            self.inner.fail_transaction(intent_ref)
        }

        fn put_operation(&self, record: &OperationRecord) -> StoreResult<()> {
            if self.fail_put_operation.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.put_operation(record)
        }

        fn get_operation(&self, id: &OperationId) -> StoreResult<Option<OperationRecord>> {
            self.inner.get_operation(id)
        }

        fn delete_operation(&self, id: &OperationId) -> StoreResult<()> {
            self.inner.delete_operation(id)
        }

        fn list_operations_by_user(
            &self,
            user_id: &UserId,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<OperationRecord>> {
            self.inner.list_operations_by_user(user_id, limit, offset)
        }

        fn count_operations_by_user(&self, user_id: &UserId) -> StoreResult<usize> {
            self.inner.count_operations_by_user(user_id)
        }

        fn put_pending_deduction(&self, pending: &PendingDeduction) -> StoreResult<()> {
            self.inner.put_pending_deduction(pending)
        }

        fn get_pending_deduction(
            &self,
            id: &OperationId,
        ) -> StoreResult<Option<PendingDeduction>> {
            self.inner.get_pending_deduction(id)
        }

        fn list_pending_deductions(
            &self,
            after: Option<&OperationId>,
            limit: usize,
        ) -> StoreResult<Vec<PendingDeduction>> {
            self.inner.list_pending_deductions(after, limit)
        }

        fn settle_pending_deduction(&self, id: &OperationId) -> StoreResult<i64> {
            self.inner.settle_pending_deduction(id)
        }
    }

    fn flaky_gate(balance: i64) -> (OperationGate, Arc<FlakyStore>, Arc<CreditLedger>, UserId) {
        let store = Arc::new(FlakyStore::default());
        let user_id = UserId::generate();
        let mut account = Account::new(user_id);
        account.credit_balance = balance;
        store.create_account(&account).unwrap();

        let ledger = Arc::new(CreditLedger::new(store.clone()));
        let gate = OperationGate::new(
            ledger.clone(),
            store.clone(),
            FakeProvider::ok(),
            OperationCatalog::default(),
        );
        (gate, store, ledger, user_id)
    }

    fn gate_with_balance(
        balance: i64,
        provider: Arc<FakeProvider>,
    ) -> (OperationGate, Arc<MemoryStore>, Arc<CreditLedger>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let mut account = Account::new(user_id);
        account.credit_balance = balance;
        store.create_account(&account).unwrap();

        let ledger = Arc::new(CreditLedger::new(store.clone()));
        let gate = OperationGate::new(
            ledger.clone(),
            store.clone(),
            provider,
            OperationCatalog::default(),
        );
        (gate, store, ledger, user_id)
    }

    fn fill(user_id: UserId) -> OperationRequest {
        OperationRequest {
            user_id,
            image: "https://img.example/cat.png".into(),
            params: OperationParams::GenerativeFill {
                aspect_ratio: AspectRatio::Square,
            },
        }
    }

    #[tokio::test]
    async fn exact_balance_then_rejected() {
        let (gate, store, ledger, user_id) = gate_with_balance(5, FakeProvider::ok());

        let receipt = gate.perform(fill(user_id)).await.unwrap();
        assert_eq!(receipt.credits_used, 5);
        assert_eq!(receipt.remaining_balance(), 0);
        assert_eq!(receipt.record.kind, OperationKind::GenerativeFill);
        assert_eq!(receipt.record.metadata["aspect_ratio"], "1:1");

        let err = gate.perform(fill(user_id)).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::InsufficientCredits {
                required: 5,
                available: 0
            }
        ));
        assert_eq!(ledger.balance(user_id).unwrap(), 0);
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_operations_drain_balance_exactly() {
        let provider = FakeProvider::ok();
        let (gate, _, ledger, user_id) = gate_with_balance(10, provider.clone());

        let restore = || OperationRequest {
            user_id,
            image: "img".into(),
            params: OperationParams::Restore,
        };
        for _ in 0..10 {
            gate.perform(restore()).await.unwrap();
        }
        assert!(gate.perform(restore()).await.is_err());
        assert_eq!(ledger.balance(user_id).unwrap(), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn provider_failure_charges_nothing() {
        let (gate, store, ledger, user_id) = gate_with_balance(5, FakeProvider::failing());

        let err = gate.perform(fill(user_id)).await.unwrap_err();
        assert!(matches!(err, GateError::Provider(_)));
        assert_eq!(ledger.balance(user_id).unwrap(), 5);
        assert_eq!(ledger.check(user_id, 5).unwrap(), 5);
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_params_never_reach_provider() {
        let provider = FakeProvider::ok();
        let (gate, _, ledger, user_id) = gate_with_balance(5, provider.clone());

        let err = gate
            .perform(OperationRequest {
                user_id,
                image: "img".into(),
                params: OperationParams::Recolor {
                    target_part: "shirt".into(),
                    color: "not-a-color".into(),
                },
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::Validation(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.balance(user_id).unwrap(), 5);
    }

    #[tokio::test]
    async fn rejected_without_account() {
        let (gate, _, _, _) = gate_with_balance(5, FakeProvider::ok());
        let err = gate.perform(fill(UserId::generate())).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Ledger(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_operations_admit_exactly_one() {
        let (gate, _, ledger, user_id) = gate_with_balance(5, FakeProvider::ok());

        let (a, b) = tokio::join!(gate.perform(fill(user_id)), gate.perform(fill(user_id)));
        let outcomes = [a, b];

        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let rejections = outcomes
            .iter()
            .filter(|r| matches!(r, Err(GateError::InsufficientCredits { .. })))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(rejections, 1);
        assert_eq!(ledger.balance(user_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn record_failure_is_free_and_releases_hold() {
        let (gate, store, ledger, user_id) = flaky_gate(5);
        store.fail_put_operation.store(true, Ordering::SeqCst);

        let err = gate.perform(fill(user_id)).await.unwrap_err();
        assert!(matches!(err, GateError::Record(_)));

        assert_eq!(ledger.balance(user_id).unwrap(), 5);
        assert_eq!(ledger.check(user_id, 5).unwrap(), 5);
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 0);
        assert!(store.list_pending_deductions(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_deduction_is_deferred_not_refunded() {
        let (gate, store, ledger, user_id) = flaky_gate(5);
        store.fail_debit.store(true, Ordering::SeqCst);

        let receipt = gate.perform(fill(user_id)).await.unwrap();
        assert_eq!(receipt.credits_used, 5);
        assert_eq!(
            receipt.settlement,
            Settlement::Deferred {
                expected_balance: 0
            }
        );
        assert_eq!(receipt.remaining_balance(), 0);
        assert_eq!(store.count_operations_by_user(&user_id).unwrap(), 1);

        // The background retry has not run yet on this single-threaded runtime.
        let pending = store.list_pending_deductions(None, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation_id, receipt.record.id);
        assert_eq!(pending[0].user_id, user_id);
        assert_eq!(pending[0].amount, 5);
        assert_eq!(ledger.balance(user_id).unwrap(), 5);

        for _ in 0..100 {
            if store.list_pending_deductions(None, 10).unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.list_pending_deductions(None, 10).unwrap().is_empty());
        assert_eq!(ledger.balance(user_id).unwrap(), 0);
    }

    #[test]
    fn stage_names() {
        assert_eq!(GateStage::ExternalCall.to_string(), "EXTERNAL_CALL");
        assert_eq!(GateStage::Done.to_string(), "DONE");
    }
}
