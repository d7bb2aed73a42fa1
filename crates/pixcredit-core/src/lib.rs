//! Core types for pixcredit.
//!
//! This crate provides the foundational types shared by the store, the HTTP
//! service and the client:
//!
//! - **Identifiers**: `UserId`, `OperationId`, `TransactionId`
//! - **Accounts**: `Account`
//! - **Operations**: `OperationKind`, `OperationParams`, `OperationCatalog`, `OperationRecord`
//! - **Payments**: `PaymentTransaction`, `TransactionStatus`
//! - **Reconciliation**: `PendingDeduction`
//!
//! # Credits
//!
//! Credits are plain `i64` units. Each paid operation costs a fixed number of
//! credits taken from the catalog; purchases add credits at a price set by the
//! client's credit package.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod deduction;
pub mod error;
pub mod ids;
pub mod operation;
pub mod payment;

pub use account::Account;
pub use deduction::PendingDeduction;
pub use error::{CoreError, Result};
pub use ids::{IdError, OperationId, TransactionId, UserId};
pub use operation::{
    AspectRatio, AssetRef, OperationCatalog, OperationKind, OperationParams, OperationRecord,
    DEFAULT_GENERATIVE_FILL_COST, DEFAULT_RECOLOR_COST, DEFAULT_REMOVE_OBJECT_COST,
    DEFAULT_RESTORE_COST,
};
pub use payment::{
    price_to_cents, PaymentTransaction, TransactionStatus, CURRENCY_USD, MAX_PRICE_USD,
};
