//! Pixcredit HTTP client implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use pixcredit_core::{OperationParams, PaymentTransaction};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, CatalogResponse, IntentRef, OperationItem, OperationPage,
    OperationResult, PerformOperationRequest, PurchaseConfirmation, PurchaseIntent,
    PurchaseRequest, TransactionList,
};

/// Pixcredit API client.
///
/// Acts for one signed-in user, identified by their bearer token.
#[derive(Debug, Clone)]
pub struct PixCreditClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PixCreditClient {
    /// Create a new pixcredit client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the pixcredit service (e.g., `"http://pixcredit:8080"`)
    /// * `token` - The user's bearer JWT
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, token, ClientOptions::default())
    }

    /// Create a new pixcredit client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        token: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    /// Get the user's current balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self) -> Result<BalanceResponse, ClientError> {
        let response = self.get("/v1/credits/balance").send().await?;
        self.handle_response(response).await
    }

    /// Get the operation catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_catalog(&self) -> Result<CatalogResponse, ClientError> {
        let response = self.get("/v1/catalog").send().await?;
        self.handle_response(response).await
    }

    /// Run a paid image operation.
    ///
    /// # Errors
    ///
    /// `ClientError::InsufficientCredits` when the balance cannot cover the
    /// operation; other errors if the request fails.
    pub async fn perform_operation(
        &self,
        image: &str,
        operation: OperationParams,
    ) -> Result<OperationResult, ClientError> {
        let response = self
            .post("/v1/operations")
            .json(&PerformOperationRequest { image, operation })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List the user's operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_operations(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<OperationPage, ClientError> {
        let response = self
            .get("/v1/operations")
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get one operation.
    ///
    /// # Errors
    ///
    /// `ClientError::NotFound` if it does not exist for this user.
    pub async fn get_operation(&self, operation_id: &str) -> Result<OperationItem, ClientError> {
        let response = self
            .get(&format!("/v1/operations/{operation_id}"))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete one operation.
    ///
    /// # Errors
    ///
    /// `ClientError::NotFound` if it does not exist for this user.
    pub async fn delete_operation(&self, operation_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(format!("{}/v1/operations/{operation_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let _: serde_json::Value = self.handle_response(response).await?;
        Ok(())
    }

    /// Start a credit purchase.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn create_purchase(
        &self,
        credits: i64,
        price: f64,
        stripe_version: Option<&str>,
    ) -> Result<PurchaseIntent, ClientError> {
        let mut request = self
            .post("/v1/payments/intents")
            .json(&PurchaseRequest { credits, price });
        if let Some(version) = stripe_version {
            request = request.header("stripe-version", version);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Confirm a purchase after payment completed.
    ///
    /// # Errors
    ///
    /// `ClientError::NotFound` if the intent is unknown or already settled.
    pub async fn confirm_purchase(
        &self,
        intent_id: &str,
    ) -> Result<PurchaseConfirmation, ClientError> {
        let response = self
            .post("/v1/payments/confirm")
            .json(&IntentRef { intent_id })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a purchase the user abandoned.
    ///
    /// # Errors
    ///
    /// `ClientError::NotFound` if the intent is unknown or already settled.
    pub async fn cancel_purchase(
        &self,
        intent_id: &str,
    ) -> Result<PaymentTransaction, ClientError> {
        let response = self
            .post("/v1/payments/cancel")
            .json(&IntentRef { intent_id })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List the user's purchases.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_transactions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<TransactionList, ClientError> {
        let response = self
            .get("/v1/payments/transactions")
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        tracing::debug!(status = %status, url = %response.url(), "Pixcredit request failed");

        let Ok(body) = response.json::<ApiErrorResponse>().await else {
            return Err(match status {
                StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
                _ => ClientError::Api {
                    code: "unknown".to_string(),
                    message: format!("HTTP {status}"),
                    status: status.as_u16(),
                },
            });
        };

        let code = body.code.unwrap_or_else(|| "unknown".to_string());
        let message = body
            .error
            .or(body.message)
            .unwrap_or_else(|| format!("HTTP {status}"));

        // Map specific error codes to typed errors
        match code.as_str() {
            "insufficient_credits" => Err(ClientError::InsufficientCredits {
                required: body.required.unwrap_or(0),
                available: body.available.unwrap_or(0),
            }),
            "not_found" => Err(ClientError::NotFound(message)),
            "unauthorized" => Err(ClientError::Unauthorized),
            _ => Err(ClientError::Api {
                code,
                message,
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 150, to cover slow transforms).
    pub timeout_seconds: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 150,
        }
    }
}
