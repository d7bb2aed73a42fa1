//! Credit purchase handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use pixcredit_core::PaymentTransaction;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::payments::PurchaseRequest;
use crate::state::AppState;

/// Header the mobile SDK uses to name its Stripe API version.
const STRIPE_VERSION_HEADER: &str = "stripe-version";

/// Create intent request.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    /// Credits in the package.
    pub credits: i64,
    /// Package price in dollars.
    pub price: f64,
}

/// Create intent response.
#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    /// Secret the client SDK confirms payment with.
    pub client_secret: String,
    /// Customer-scoped ephemeral key secret.
    pub ephemeral_key: String,
    /// Processor customer reference.
    pub customer_ref: String,
    /// Processor intent reference, passed back on confirm.
    pub intent_id: String,
}

/// Start a credit purchase.
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, ApiError> {
    let api_version = headers
        .get(STRIPE_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let intent = state
        .tracker
        .create(PurchaseRequest {
            user_id: auth.user_id,
            email: auth.email,
            name: auth.name,
            credits: body.credits,
            price: body.price,
            api_version,
        })
        .await?;

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
        ephemeral_key: intent.ephemeral_key,
        customer_ref: intent.customer_ref,
        intent_id: intent.intent_id,
    }))
}

/// Confirm or cancel request.
#[derive(Debug, Deserialize)]
pub struct IntentRef {
    /// Processor intent reference.
    pub intent_id: String,
}

/// Confirm response.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// Always true; failures are error responses.
    pub success: bool,
    /// Balance after crediting.
    pub new_balance: i64,
    /// Credits granted.
    pub credits_added: i64,
}

/// Confirm a purchase after the client completed payment.
pub async fn confirm_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<IntentRef>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let confirmation = state.tracker.confirm(auth.user_id, &body.intent_id)?;

    Ok(Json(ConfirmResponse {
        success: true,
        new_balance: confirmation.new_balance,
        credits_added: confirmation.credits_added,
    }))
}

/// Mark a purchase as abandoned or failed.
pub async fn cancel_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<IntentRef>,
) -> Result<Json<PaymentTransaction>, ApiError> {
    Ok(Json(state.tracker.cancel(auth.user_id, &body.intent_id)?))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<PaymentTransaction>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the caller's purchases.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let mut transactions = state
        .tracker
        .list(auth.user_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}
