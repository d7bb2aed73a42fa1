//! Pixcredit Client SDK.
//!
//! This crate provides a client library for apps to interact with the
//! pixcredit API on behalf of a signed-in user.
//!
//! # Example
//!
//! ```no_run
//! use pixcredit_client::{ClientError, PixCreditClient};
//! use pixcredit_core::{AspectRatio, OperationParams};
//!
//! # async fn example() -> Result<(), ClientError> {
//! let client = PixCreditClient::new("https://pixcredit.example.com", "user-jwt")?;
//!
//! match client
//!     .perform_operation(
//!         "https://img.example.com/cat.png",
//!         OperationParams::GenerativeFill {
//!             aspect_ratio: AspectRatio::Widescreen,
//!         },
//!     )
//!     .await
//! {
//!     Ok(result) => println!("{} credits left", result.remaining_balance),
//!     Err(ClientError::InsufficientCredits { required, available }) => {
//!         println!("need {required}, have {available}");
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, PixCreditClient};
pub use error::ClientError;
pub use types::*;
