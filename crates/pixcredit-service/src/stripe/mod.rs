//! Stripe integration for credit purchases.
//!
//! Stripe handles:
//! - Customer registration
//! - Ephemeral keys for the mobile payment sheet
//! - Payment intents for credit packages

pub mod client;
pub mod types;

pub use client::StripeClient;
pub use client::StripeError;
pub use types::*;
