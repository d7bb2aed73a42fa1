//! Request and response types for the pixcredit client.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pixcredit_core::{AssetRef, OperationKind, OperationParams, PaymentTransaction};

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Current credit balance.
    pub credit_balance: i64,
}

/// Operation catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    /// Credit cost per operation kind.
    pub operations: BTreeMap<OperationKind, i64>,
}

/// Perform operation request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PerformOperationRequest<'a> {
    pub image: &'a str,
    pub operation: OperationParams,
}

/// Result of a paid operation.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationResult {
    /// ID of the stored operation.
    pub operation_id: String,
    /// The transformed image.
    pub result_asset: AssetRef,
    /// Balance after the charge.
    pub remaining_balance: i64,
    /// Credits charged.
    pub credits_used: i64,
}

/// An operation from the user's history.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationItem {
    /// Operation ID.
    pub id: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Current cost of this kind.
    pub credit_cost: i64,
    /// The uploaded source image.
    pub source_asset: AssetRef,
    /// The transformed image.
    pub result_asset: AssetRef,
    /// Operation parameters.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the operation ran.
    pub created_at: DateTime<Utc>,
}

/// One page of operation history.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationPage {
    /// Items, newest first.
    pub items: Vec<OperationItem>,
    /// Total operations.
    pub total: usize,
    /// Page size.
    pub per_page: usize,
    /// Page returned.
    pub current_page: usize,
    /// Last page.
    pub last_page: usize,
    /// Whether more pages follow.
    pub has_more: bool,
}

/// Purchase request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PurchaseRequest {
    pub credits: i64,
    pub price: f64,
}

/// Handles needed to present the payment sheet.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseIntent {
    /// Secret the payment SDK confirms with.
    pub client_secret: String,
    /// Customer-scoped ephemeral key.
    pub ephemeral_key: String,
    /// Processor customer reference.
    pub customer_ref: String,
    /// Intent reference to confirm or cancel later.
    pub intent_id: String,
}

/// Confirm or cancel request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct IntentRef<'a> {
    pub intent_id: &'a str,
}

/// Result of confirming a purchase.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseConfirmation {
    /// Always true for a successful response.
    pub success: bool,
    /// Balance after crediting.
    pub new_balance: i64,
    /// Credits granted.
    pub credits_added: i64,
}

/// Purchase history.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionList {
    /// Transactions, newest first.
    pub transactions: Vec<PaymentTransaction>,
    /// Whether more transactions exist.
    pub has_more: bool,
}

/// API error response, covering both the plain and the insufficient
/// credits shapes.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub required: Option<i64>,
    #[serde(default)]
    pub available: Option<i64>,
}
