//! Stripe API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{Customer, EphemeralKey, PaymentIntent, StripeErrorResponse};
use crate::payments::{IntentRequest, PaymentProcessor, ProcessorError, ProcessorIntent};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    api_version: String,
    base_url: String,
}

impl StripeClient {
    /// Stripe API base URL.
    const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `api_version` - Version used for ephemeral keys when the client
    ///   SDK does not name one
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StripeError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            api_version: api_version.into(),
            base_url: Self::BASE_URL.to_string(),
        })
    }

    /// Point the client at another API root (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Create a new Stripe customer.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Our internal user ID (stored as metadata)
    /// * `email` - Optional customer email
    /// * `name` - Optional customer name
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_customer(
        &self,
        user_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<Customer, StripeError> {
        let mut params = vec![("metadata[user_id]", user_id.to_string())];

        if let Some(email) = email {
            params.push(("email", email.to_string()));
        }
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create an ephemeral key for a customer.
    ///
    /// Stripe requires the key to be minted for the API version the client
    /// SDK speaks, sent as the `Stripe-Version` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_ephemeral_key(
        &self,
        customer_id: &str,
        stripe_version: Option<&str>,
    ) -> Result<EphemeralKey, StripeError> {
        let version = stripe_version.unwrap_or(&self.api_version);

        let response = self
            .client
            .post(format!("{}/ephemeral_keys", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .header("Stripe-Version", version)
            .form(&[("customer", customer_id)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a payment intent for a credit package.
    ///
    /// # Arguments
    ///
    /// * `customer_id` - Stripe customer ID
    /// * `user_id` - Our internal user ID (metadata)
    /// * `amount_cents` - Amount to charge in cents
    /// * `currency` - ISO currency code
    /// * `credits_amount` - Number of credits being purchased (metadata)
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_payment_intent(
        &self,
        customer_id: &str,
        user_id: &str,
        amount_cents: i64,
        currency: &str,
        credits_amount: i64,
    ) -> Result<PaymentIntent, StripeError> {
        let params = [
            ("amount", amount_cents.to_string()),
            ("currency", currency.to_string()),
            ("customer", customer_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[user_id]", user_id.to_string()),
            ("metadata[credits_amount]", credits_amount.to_string()),
        ];

        tracing::debug!(
            user_id = %user_id,
            amount_cents = %amount_cents,
            credits = %credits_amount,
            "Creating Stripe payment intent"
        );

        let response = self
            .client
            .post(format!("{}/payment_intents", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

impl From<StripeError> for ProcessorError {
    fn from(err: StripeError) -> Self {
        Self(err.to_string())
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_intent(
        &self,
        request: &IntentRequest,
    ) -> Result<ProcessorIntent, ProcessorError> {
        let user_id = request.user_id.to_string();

        let customer = self
            .create_customer(&user_id, request.email.as_deref(), request.name.as_deref())
            .await?;
        let key = self
            .create_ephemeral_key(&customer.id, request.api_version.as_deref())
            .await?;
        let intent = self
            .create_payment_intent(
                &customer.id,
                &user_id,
                request.amount_cents,
                request.currency,
                request.credits,
            )
            .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            ProcessorError(format!("payment intent {} has no client secret", intent.id))
        })?;

        Ok(ProcessorIntent {
            intent_id: intent.id,
            client_secret,
            ephemeral_key: key.secret,
            customer_ref: customer.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixcredit_core::UserId;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new("sk_test_xxx", "2022-11-15")
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn intent_request(api_version: Option<&str>) -> IntentRequest {
        IntentRequest {
            user_id: UserId::generate(),
            email: Some("ada@example.com".into()),
            name: None,
            credits: 50,
            amount_cents: 499,
            currency: "usd",
            api_version: api_version.map(str::to_string),
        }
    }

    async fn mount_customer(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/customers"))
            .and(body_string_contains("email=ada%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_123",
                "email": "ada@example.com"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn create_intent_runs_customer_key_and_intent() {
        let server = MockServer::start().await;
        mount_customer(&server).await;
        Mock::given(method("POST"))
            .and(path("/ephemeral_keys"))
            .and(header("Stripe-Version", "2024-06-20"))
            .and(body_string_contains("customer=cus_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ephkey_1",
                "secret": "ek_test_secret"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .and(body_string_contains("amount=499"))
            .and(body_string_contains("metadata%5Bcredits_amount%5D=50"))
            .and(body_string_contains("automatic_payment_methods%5Benabled%5D=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "client_secret": "pi_123_secret_abc",
                "amount": 499,
                "currency": "usd",
                "status": "requires_payment_method",
                "customer": "cus_123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_intent(&intent_request(Some("2024-06-20")))
            .await
            .unwrap();

        assert_eq!(
            intent,
            ProcessorIntent {
                intent_id: "pi_123".into(),
                client_secret: "pi_123_secret_abc".into(),
                ephemeral_key: "ek_test_secret".into(),
                customer_ref: "cus_123".into(),
            }
        );
    }

    #[tokio::test]
    async fn ephemeral_key_falls_back_to_configured_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ephemeral_keys"))
            .and(header("Stripe-Version", "2022-11-15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ephkey_2",
                "secret": "ek_default"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = client(&server)
            .create_ephemeral_key("cus_9", None)
            .await
            .unwrap();
        assert_eq!(key.secret, "ek_default");
    }

    #[tokio::test]
    async fn api_error_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "type": "invalid_request_error",
                    "message": "Invalid API Key provided",
                    "code": "api_key_invalid"
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_customer("u1", None, None)
            .await
            .unwrap_err();

        match err {
            StripeError::Api {
                error_type, code, ..
            } => {
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(code.as_deref(), Some("api_key_invalid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_error_body_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_customer("u1", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn failed_customer_stops_the_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client(&server)
            .create_intent(&intent_request(None))
            .await;
        assert!(result.is_err());
    }
}
