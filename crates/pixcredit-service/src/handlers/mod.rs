//! API handlers.

pub mod accounts;
pub mod admin;
pub mod catalog;
pub mod credits;
pub mod health;
pub mod operations;
pub mod payments;
