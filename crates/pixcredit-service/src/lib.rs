//! Pixcredit HTTP API Service.
//!
//! This crate provides the HTTP API for pixcredit, a credit ledger for paid
//! image operations:
//!
//! - Ledger accounts and credit balances
//! - Paid operations gated on available credits and charged after the effect
//! - Credit purchases through Stripe payment intents
//! - Operation history with best-effort remote asset cleanup
//! - Reconciliation of deductions that could not be applied in line
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **Bearer JWTs** (HS256) - For end-user requests from the mobile app
//! 2. **Admin API key** - For operator endpoints (`X-Admin-Key`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for axum even when they don't await

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod history;
pub mod ledger;
pub mod payments;
pub mod provider;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use gate::{GateError, OperationGate};
pub use history::OperationHistory;
pub use ledger::{CreditLedger, LedgerError};
pub use payments::{PaymentIntentTracker, PaymentProcessor};
pub use provider::{HttpTransformProvider, TransformProvider};
pub use reconcile::Reconciler;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
