//! Application state.

use std::sync::Arc;

use pixcredit_store::Store;

use crate::config::ServiceConfig;
use crate::gate::OperationGate;
use crate::history::OperationHistory;
use crate::ledger::CreditLedger;
use crate::payments::{PaymentIntentTracker, PaymentProcessor};
use crate::provider::{HttpTransformProvider, TransformProvider};
use crate::reconcile::Reconciler;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Credit ledger; the only writer of balances.
    pub ledger: Arc<CreditLedger>,

    /// Paid operation gate (absent without a transform provider).
    pub gate: Option<OperationGate>,

    /// Purchase intent tracker.
    pub tracker: PaymentIntentTracker,

    /// Operation history view.
    pub history: OperationHistory,

    /// Deferred deduction reconciler.
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    /// Create a new application state, building collaborators from config.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let provider = config
            .provider_base_url
            .as_ref()
            .zip(config.provider_api_key.as_ref())
            .and_then(|(url, key)| match HttpTransformProvider::new(url, key.clone()) {
                Ok(provider) => {
                    tracing::info!(provider_url = %url, "Transform provider enabled");
                    Some(Arc::new(provider) as Arc<dyn TransformProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create transform provider client");
                    None
                }
            });

        if provider.is_none() {
            tracing::warn!("Transform provider not configured - paid operations unavailable");
        }

        let processor = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_api_version.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client) as Arc<dyn PaymentProcessor>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if processor.is_none() {
            tracing::warn!("Stripe not configured - purchases will not be available");
        }

        Self::with_collaborators(store, config, provider, processor)
    }

    /// Create application state around explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        provider: Option<Arc<dyn TransformProvider>>,
        processor: Option<Arc<dyn PaymentProcessor>>,
    ) -> Self {
        let ledger = Arc::new(CreditLedger::new(store.clone()));

        let gate = provider.clone().map(|provider| {
            OperationGate::new(
                ledger.clone(),
                store.clone(),
                provider,
                config.catalog.clone(),
            )
        });
        let tracker = PaymentIntentTracker::new(store.clone(), ledger.clone(), processor);
        let history = OperationHistory::new(store.clone(), config.catalog.clone(), provider);
        let reconciler = Arc::new(Reconciler::new(store.clone(), ledger.clone()));

        Self {
            store,
            config,
            ledger,
            gate,
            tracker,
            history,
            reconciler,
        }
    }

    /// Check if paid operations are available.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.gate.is_some()
    }
}
