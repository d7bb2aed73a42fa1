//! Ledger account for a user.
//!
//! The user identity itself belongs to the auth provider; the account is the
//! ledger's view of that user: an integer credit balance plus lifetime
//! counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A credit account for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID (from the auth token).
    pub user_id: UserId,

    /// Current credit balance. Never negative.
    pub credit_balance: i64,

    /// Lifetime credits purchased through confirmed transactions.
    pub lifetime_purchased: i64,

    /// Lifetime credits consumed by paid operations.
    pub lifetime_used: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            credit_balance: 0,
            lifetime_purchased: 0,
            lifetime_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a deduction of `amount` credits.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credit_balance >= amount
    }

    /// Apply a purchase credit in place.
    pub fn apply_credit(&mut self, amount: i64) {
        self.credit_balance += amount;
        self.lifetime_purchased += amount;
        self.updated_at = Utc::now();
    }

    /// Apply a usage debit in place. Callers check sufficiency first.
    pub fn apply_debit(&mut self, amount: i64) {
        self.credit_balance -= amount;
        self.lifetime_used += amount;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(UserId::generate());
        assert_eq!(account.credit_balance, 0);
        assert_eq!(account.lifetime_purchased, 0);
        assert_eq!(account.lifetime_used, 0);
    }

    #[test]
    fn sufficiency_is_inclusive() {
        let mut account = Account::new(UserId::generate());
        account.credit_balance = 5;

        assert!(account.has_sufficient_credits(5));
        assert!(!account.has_sufficient_credits(6));
    }

    #[test]
    fn credit_and_debit_track_lifetime_counters() {
        let mut account = Account::new(UserId::generate());
        account.apply_credit(50);
        account.apply_debit(5);

        assert_eq!(account.credit_balance, 45);
        assert_eq!(account.lifetime_purchased, 50);
        assert_eq!(account.lifetime_used, 5);
    }
}
