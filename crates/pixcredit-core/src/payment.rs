//! Purchase transactions.
//!
//! A transaction is the local record of a processor-side payment intent. It
//! is born `pending` and moves to `completed` (credits granted) or `failed`
//! exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::{TransactionId, UserId};

/// The only supported currency.
pub const CURRENCY_USD: &str = "usd";

/// Upper bound on a single purchase price in dollars.
pub const MAX_PRICE_USD: f64 = 100_000.0;

/// Convert a dollar price into integer cents.
///
/// # Errors
///
/// Returns `CoreError::InvalidAmount` for negative, non-finite or oversized prices.
#[allow(clippy::cast_possible_truncation)]
pub fn price_to_cents(price: f64) -> Result<i64> {
    if !price.is_finite() || price < 0.0 {
        return Err(CoreError::InvalidAmount(
            "price must be a non-negative number".into(),
        ));
    }
    if price > MAX_PRICE_USD {
        return Err(CoreError::InvalidAmount(format!(
            "price must not exceed {MAX_PRICE_USD}"
        )));
    }
    Ok((price * 100.0).round() as i64)
}

/// Status of a purchase transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Intent created, payment not yet confirmed.
    Pending,
    /// Payment confirmed and credits granted.
    Completed,
    /// Payment cancelled or failed; no credits granted.
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// A credit purchase tracked against a payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Transaction ID (ULID).
    pub id: TransactionId,

    /// The purchasing user.
    pub user_id: UserId,

    /// Processor intent reference. Unique across all transactions.
    pub intent_ref: String,

    /// Credits granted on completion.
    pub credits_requested: i64,

    /// Amount charged, in cents.
    pub amount_cents: i64,

    /// Currency of `amount_cents`.
    pub currency: String,

    /// Lifecycle status.
    pub status: TransactionStatus,

    /// When the intent was created.
    pub created_at: DateTime<Utc>,

    /// Last status change.
    pub updated_at: DateTime<Utc>,

    /// When credits were granted.
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    /// Create a pending transaction for a freshly created intent.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        intent_ref: impl Into<String>,
        credits_requested: i64,
        amount_cents: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::generate(),
            user_id,
            intent_ref: intent_ref.into(),
            credits_requested,
            amount_cents,
            currency: CURRENCY_USD.to_string(),
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the transaction still awaits confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Transition `pending → completed`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the transaction is pending.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(TransactionStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Transition `pending → failed`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the transaction is pending.
    pub fn fail(&mut self) -> Result<()> {
        self.transition(TransactionStatus::Failed)
    }

    fn transition(&mut self, to: TransactionStatus) -> Result<()> {
        if !self.is_pending() {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transaction_completes_once() {
        let mut tx = PaymentTransaction::pending(UserId::generate(), "pi_123", 50, 1000);
        assert!(tx.is_pending());
        assert_eq!(tx.currency, "usd");

        tx.complete().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.completed_at.is_some());

        let err = tx.complete().unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: TransactionStatus::Completed,
                to: TransactionStatus::Completed
            }
        );
    }

    #[test]
    fn failed_transaction_cannot_complete() {
        let mut tx = PaymentTransaction::pending(UserId::generate(), "pi_456", 10, 200);
        tx.fail().unwrap();
        assert!(tx.complete().is_err());
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn price_conversion() {
        assert_eq!(price_to_cents(10.0).unwrap(), 1000);
        assert_eq!(price_to_cents(0.0).unwrap(), 0);
        assert_eq!(price_to_cents(19.999).unwrap(), 2000);
        assert!(price_to_cents(-1.0).is_err());
        assert!(price_to_cents(f64::NAN).is_err());
        assert!(price_to_cents(MAX_PRICE_USD + 1.0).is_err());
    }
}
