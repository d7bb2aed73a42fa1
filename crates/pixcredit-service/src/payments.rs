//! Credit purchases.
//!
//! A purchase starts as a processor-side payment intent plus a local
//! `pending` transaction. The client completes payment with the processor and
//! then calls back; confirmation credits the ledger exactly once per intent.
//!
//! Confirmation trusts the client's callback: the processor is not asked
//! whether the intent actually succeeded.

use std::sync::Arc;

use async_trait::async_trait;

use pixcredit_core::{price_to_cents, CoreError, PaymentTransaction, UserId, CURRENCY_USD};
use pixcredit_store::{Store, StoreError};

use crate::ledger::{CreditLedger, LedgerError};

/// Error reported by a payment processor.
#[derive(Debug, thiserror::Error)]
#[error("payment processor error: {0}")]
pub struct ProcessorError(pub String);

/// What the processor needs to create an intent.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    /// Purchasing user.
    pub user_id: UserId,
    /// User email, if the token carried one.
    pub email: Option<String>,
    /// User display name, if the token carried one.
    pub name: Option<String>,
    /// Credits being bought (intent metadata).
    pub credits: i64,
    /// Amount to charge, in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: &'static str,
    /// Processor API version requested by the client SDK.
    pub api_version: Option<String>,
}

/// Handles returned to the client to complete payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorIntent {
    /// Processor intent reference.
    pub intent_id: String,
    /// Secret used by the client SDK to confirm the intent.
    pub client_secret: String,
    /// Ephemeral key secret scoped to the customer.
    pub ephemeral_key: String,
    /// Processor customer reference.
    pub customer_ref: String,
}

/// A payment processor able to create payment intents.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a customer-scoped payment intent.
    async fn create_intent(
        &self,
        request: &IntentRequest,
    ) -> Result<ProcessorIntent, ProcessorError>;
}

/// Errors returned by the intent tracker.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Credits or price out of range.
    #[error("invalid purchase: {0}")]
    Invalid(String),

    /// No processor configured.
    #[error("payment processor not configured")]
    NotConfigured,

    /// The processor call failed.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Unknown intent, already settled, or owned by someone else.
    #[error("transaction not found")]
    NotFound,

    /// Ledger failure.
    #[error(transparent)]
    Ledger(LedgerError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for PaymentError {
    fn from(err: CoreError) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl From<LedgerError> for PaymentError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::TransactionNotPending(_) => Self::NotFound,
            other => Self::Ledger(other),
        }
    }
}

/// Purchase details from the client.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Buyer.
    pub user_id: UserId,
    /// Buyer email, forwarded to the processor.
    pub email: Option<String>,
    /// Buyer name, forwarded to the processor.
    pub name: Option<String>,
    /// Credits to grant on confirmation.
    pub credits: i64,
    /// Price in dollars.
    pub price: f64,
    /// Processor API version requested by the client SDK.
    pub api_version: Option<String>,
}

/// Result of a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Balance after crediting.
    pub new_balance: i64,
    /// Credits granted.
    pub credits_added: i64,
}

/// Tracks purchase intents from creation to confirmation.
pub struct PaymentIntentTracker {
    store: Arc<dyn Store>,
    ledger: Arc<CreditLedger>,
    processor: Option<Arc<dyn PaymentProcessor>>,
}

impl PaymentIntentTracker {
    /// Create a tracker. Without a processor, `create` fails with
    /// `NotConfigured` while confirmation keeps working.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<CreditLedger>,
        processor: Option<Arc<dyn PaymentProcessor>>,
    ) -> Self {
        Self {
            store,
            ledger,
            processor,
        }
    }

    /// Whether purchases can be started.
    #[must_use]
    pub fn accepts_purchases(&self) -> bool {
        self.processor.is_some()
    }

    /// Create a processor intent and persist it as a pending transaction.
    ///
    /// Nothing is written locally unless the processor call succeeds.
    ///
    /// # Errors
    ///
    /// `Invalid` for bad input, `Ledger(AccountNotFound)` if the buyer has no
    /// account, `Processor` when the processor fails.
    pub async fn create(&self, request: PurchaseRequest) -> Result<ProcessorIntent, PaymentError> {
        if request.credits < 1 {
            return Err(PaymentError::Invalid("credits must be at least 1".into()));
        }
        let amount_cents = price_to_cents(request.price)?;
        let processor = self.processor.as_ref().ok_or(PaymentError::NotConfigured)?;

        self.ledger.account(request.user_id)?;

        let intent = processor
            .create_intent(&IntentRequest {
                user_id: request.user_id,
                email: request.email,
                name: request.name,
                credits: request.credits,
                amount_cents,
                currency: CURRENCY_USD,
                api_version: request.api_version,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %request.user_id,
                    error = %e,
                    "Payment intent creation failed"
                );
                e
            })?;

        let transaction = PaymentTransaction::pending(
            request.user_id,
            intent.intent_id.clone(),
            request.credits,
            amount_cents,
        );
        if let Err(e) = self.store.create_transaction(&transaction) {
            tracing::error!(
                user_id = %request.user_id,
                intent_ref = %intent.intent_id,
                error = %e,
                "Processor intent created but pending transaction not saved"
            );
            return Err(e.into());
        }

        tracing::info!(
            user_id = %request.user_id,
            intent_ref = %intent.intent_id,
            credits = request.credits,
            amount_cents,
            "Purchase intent created"
        );
        Ok(intent)
    }

    fn pending_for(
        &self,
        user_id: UserId,
        intent_ref: &str,
    ) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self
            .store
            .get_transaction_by_intent(intent_ref)?
            .ok_or(PaymentError::NotFound)?;

        if transaction.user_id != user_id {
            tracing::warn!(
                user_id = %user_id,
                intent_ref = %intent_ref,
                "Intent belongs to another user"
            );
            return Err(PaymentError::NotFound);
        }
        if !transaction.is_pending() {
            tracing::debug!(
                intent_ref = %intent_ref,
                status = %transaction.status,
                "Intent already settled"
            );
            return Err(PaymentError::NotFound);
        }
        Ok(transaction)
    }

    /// Confirm a purchase and credit the buyer.
    ///
    /// # Errors
    ///
    /// `NotFound` when the intent is unknown, already completed or failed, or
    /// belongs to another user.
    pub fn confirm(&self, user_id: UserId, intent_ref: &str) -> Result<Confirmation, PaymentError> {
        let transaction = self.pending_for(user_id, intent_ref)?;
        let (completed, new_balance) = self.ledger.credit(&transaction)?;

        Ok(Confirmation {
            new_balance,
            credits_added: completed.credits_requested,
        })
    }

    /// Record that the client abandoned or failed the payment.
    ///
    /// # Errors
    ///
    /// `NotFound` under the same conditions as [`confirm`](Self::confirm).
    pub fn cancel(
        &self,
        user_id: UserId,
        intent_ref: &str,
    ) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self.pending_for(user_id, intent_ref)?;
        Ok(self.ledger.decline(&transaction)?)
    }

    /// A user's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn list(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>, PaymentError> {
        Ok(self
            .store
            .list_transactions_by_user(&user_id, limit, offset)?)
    }
}
