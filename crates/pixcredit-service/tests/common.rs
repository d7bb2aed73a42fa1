//! Common test utilities for pixcredit integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use pixcredit_core::{AssetRef, UserId};
use pixcredit_service::auth::JwtClaims;
use pixcredit_service::payments::{
    IntentRequest, PaymentProcessor, ProcessorError, ProcessorIntent,
};
use pixcredit_service::provider::{
    ProviderError, TransformOutput, TransformProvider, TransformRequest,
};
use pixcredit_service::{create_router, AppState, ServiceConfig};
use pixcredit_store::MemoryStore;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const ADMIN_KEY: &str = "integration-admin-key";

/// Transform provider double with switchable failures.
#[derive(Default)]
pub struct FakeProvider {
    pub calls: AtomicUsize,
    pub fail_transform: AtomicBool,
    pub fail_delete: AtomicBool,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl TransformProvider for FakeProvider {
    async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent requests interleave.
        tokio::task::yield_now().await;

        if self.fail_transform.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 500,
                body: "model crashed; key=sk_provider_secret".into(),
            });
        }

        Ok(TransformOutput {
            source_asset: AssetRef {
                id: format!("src-{n}"),
                url: request.source.clone(),
            },
            result_asset: AssetRef {
                id: format!("out-{n}"),
                url: format!("https://cdn.test/out-{n}.png"),
            },
        })
    }

    async fn delete_asset(&self, asset: &AssetRef) -> Result<(), ProviderError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 503,
                body: "storage unavailable".into(),
            });
        }
        self.deleted.lock().unwrap().push(asset.id.clone());
        Ok(())
    }
}

/// Payment processor double that mints sequential intents.
#[derive(Default)]
pub struct FakeProcessor {
    pub intents: AtomicUsize,
    pub fail: AtomicBool,
    pub last_api_version: Mutex<Option<String>>,
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(
        &self,
        request: &IntentRequest,
    ) -> Result<ProcessorIntent, ProcessorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProcessorError("card network unreachable".into()));
        }
        *self.last_api_version.lock().unwrap() = request.api_version.clone();

        let n = self.intents.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessorIntent {
            intent_id: format!("pi_test_{n}"),
            client_secret: format!("pi_test_{n}_secret"),
            ephemeral_key: "ek_test".into(),
            customer_ref: format!("cus_{}", request.user_id),
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// Transform provider double.
    pub provider: Arc<FakeProvider>,
    /// Payment processor double.
    pub processor: Arc<FakeProcessor>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider::default());
        let processor = Arc::new(FakeProcessor::default());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: String::new(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            ..ServiceConfig::default()
        };

        let state = AppState::with_collaborators(
            store.clone(),
            config,
            Some(provider.clone()),
            Some(processor.clone()),
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            provider,
            processor,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(self.test_user_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        Self::auth_header_for(UserId::generate())
    }

    /// Mint a bearer header for a user.
    pub fn auth_header_for(user_id: UserId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            iss: "pixcredit-auth".into(),
            aud: "pixcredit".into(),
            exp: now + 3600,
            iat: now,
            email: Some("tester@example.com".into()),
            name: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Open an account for the test user and buy `credits` through the
    /// purchase flow.
    pub async fn create_funded_account(&self, credits: i64) {
        self.create_funded_account_for(&self.user_auth_header(), credits)
            .await;
    }

    /// Open an account for the holder of `auth` and buy `credits`.
    pub async fn create_funded_account_for(&self, auth: &str, credits: i64) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", auth.to_string())
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        if credits > 0 {
            let intent: serde_json::Value = self
                .server
                .post("/v1/payments/intents")
                .add_header("authorization", auth.to_string())
                .json(&json!({ "credits": credits, "price": 1.0 }))
                .await
                .json();

            self.server
                .post("/v1/payments/confirm")
                .add_header("authorization", auth.to_string())
                .json(&json!({ "intent_id": intent["intent_id"] }))
                .await
                .assert_status_ok();
        }
    }

    /// Current balance of the test user.
    pub async fn balance(&self) -> i64 {
        let body: serde_json::Value = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", self.user_auth_header())
            .await
            .json();
        body["credit_balance"].as_i64().expect("balance missing")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
