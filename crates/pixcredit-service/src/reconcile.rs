//! Settlement of deferred deductions.
//!
//! A paid operation whose deduction failed after the transform succeeded
//! leaves a `PendingDeduction` behind. It is retried right away with
//! exponential backoff, and anything still outstanding is picked up by the
//! periodic sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use pixcredit_core::{OperationId, PendingDeduction};
use pixcredit_store::{Store, StoreError};

use crate::ledger::{CreditLedger, LedgerError};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of immediate settlement attempts.
const SETTLE_MAX_RETRIES: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const SETTLE_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const SETTLE_MAX_BACKOFF_MS: u64 = 5000;

/// Deductions read per page of a sweep.
const SWEEP_BATCH_SIZE: usize = 100;

/// Outcome of one reconciliation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending deductions looked at.
    pub examined: usize,
    /// Deductions charged by this sweep.
    pub settled: usize,
    /// Deductions another attempt charged first.
    pub already_settled: usize,
    /// Deductions that are still outstanding.
    pub failed: usize,
}

/// Settles deferred deductions against the ledger.
pub struct Reconciler {
    store: Arc<dyn Store>,
    ledger: Arc<CreditLedger>,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ledger: Arc<CreditLedger>) -> Self {
        Self { store, ledger }
    }

    /// Outstanding deductions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn outstanding(&self, limit: usize) -> Result<Vec<PendingDeduction>, StoreError> {
        self.store.list_pending_deductions(None, limit)
    }

    /// Try to settle every outstanding deduction once.
    ///
    /// Pages through the whole pending set in operation order, so entries
    /// that keep failing never hide the ones queued behind them.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending list cannot be read. Individual
    /// settlement failures are counted in the report.
    pub fn sweep(&self) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let mut cursor: Option<OperationId> = None;

        loop {
            let page = self
                .store
                .list_pending_deductions(cursor.as_ref(), SWEEP_BATCH_SIZE)?;
            let exhausted = page.len() < SWEEP_BATCH_SIZE;

            for pending in &page {
                report.examined += 1;
                self.settle_one(pending, &mut report);
            }

            match page.last() {
                Some(last) if !exhausted => cursor = Some(last.operation_id),
                _ => break,
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                settled = report.settled,
                failed = report.failed,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    fn settle_one(&self, pending: &PendingDeduction, report: &mut SweepReport) {
        match self.ledger.settle_pending(pending) {
            Ok(_) => report.settled += 1,
            Err(LedgerError::AlreadySettled(_)) => report.already_settled += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    user_id = %pending.user_id,
                    operation_id = %pending.operation_id,
                    amount = pending.amount,
                    attempts = pending.attempts + 1,
                    error = %e,
                    "Deferred deduction still outstanding"
                );
            }
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep() {
                    tracing::error!(error = %e, "Reconciliation sweep failed");
                }
            }
        })
    }
}

/// Retry a deferred deduction in the background.
pub fn spawn_settle_retry(ledger: Arc<CreditLedger>, pending: PendingDeduction) -> JoinHandle<()> {
    tokio::spawn(async move {
        match settle_with_retry(&ledger, &pending).await {
            Ok(_) | Err(LedgerError::AlreadySettled(_)) => {}
            Err(e) => {
                tracing::error!(
                    user_id = %pending.user_id,
                    operation_id = %pending.operation_id,
                    amount = pending.amount,
                    error = %e,
                    "Deferred deduction not settled after retries; left for reconciliation"
                );
            }
        }
    })
}

/// Settle a deferred deduction with exponential backoff retry.
async fn settle_with_retry(
    ledger: &CreditLedger,
    pending: &PendingDeduction,
) -> Result<i64, LedgerError> {
    let mut attempt = 0;
    let mut backoff_ms = SETTLE_INITIAL_BACKOFF_MS;

    loop {
        match ledger.settle_pending(pending) {
            Ok(balance) => return Ok(balance),
            Err(e @ LedgerError::AlreadySettled(_)) => return Err(e),
            Err(e) => {
                attempt += 1;

                if attempt >= SETTLE_MAX_RETRIES {
                    return Err(e);
                }

                tracing::debug!(
                    operation_id = %pending.operation_id,
                    attempt = %attempt,
                    backoff_ms = %backoff_ms,
                    error = %e,
                    "Deferred deduction failed, retrying"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                backoff_ms = (backoff_ms * 2).min(SETTLE_MAX_BACKOFF_MS);
            }
        }
    }
}
