//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, catalog, credits, health, operations, payments};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for paid operation endpoints.
/// Each one holds a provider call open for up to two minutes.
const OPERATIONS_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts and credits (JWT auth)
/// - `POST /v1/accounts` - Open a ledger account
/// - `GET /v1/accounts/me` - Get current user's account
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/catalog` - Operation costs
///
/// ## Operations (JWT auth, rate-limited)
/// - `POST /v1/operations` - Run a paid image operation
/// - `GET /v1/operations` - Paginated history
/// - `GET /v1/operations/:id` - One operation
/// - `DELETE /v1/operations/:id` - Delete an operation
///
/// ## Payments (JWT auth)
/// - `POST /v1/payments/intents` - Start a purchase
/// - `POST /v1/payments/confirm` - Confirm a purchase
/// - `POST /v1/payments/cancel` - Cancel a purchase
/// - `GET /v1/payments/transactions` - Purchase history
///
/// ## Admin (`X-Admin-Key`)
/// - `GET /v1/admin/pending-deductions` - Outstanding deferred deductions
/// - `POST /v1/admin/reconcile` - Run a reconciliation sweep
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let operation_routes = Router::new()
        .route(
            "/",
            post(operations::perform_operation).get(operations::list_operations),
        )
        .route(
            "/:id",
            get(operations::get_operation).delete(operations::delete_operation),
        )
        .layer(ConcurrencyLimitLayer::new(OPERATIONS_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/catalog", get(catalog::get_catalog))
        // Payments
        .route("/payments/intents", post(payments::create_intent))
        .route("/payments/confirm", post(payments::confirm_intent))
        .route("/payments/cancel", post(payments::cancel_intent))
        .route("/payments/transactions", get(payments::list_transactions))
        // Admin
        .route("/admin/pending-deductions", get(admin::list_pending_deductions))
        .route("/admin/reconcile", post(admin::reconcile))
        // Operations (with their own concurrency limit)
        .nest("/operations", operation_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
