//! Image transform provider.
//!
//! The provider uploads the source image, runs the transform and hosts both
//! assets. The service only talks to it through [`TransformProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use pixcredit_core::{AssetRef, OperationKind, OperationParams};

/// Transforms can take a while; the provider runs a diffusion model.
const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(120);

/// Error type for provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for logs.
        body: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// A transform to run.
#[derive(Debug, Clone, Serialize)]
pub struct TransformRequest {
    /// What to do.
    pub kind: OperationKind,
    /// The source image (URL or data URI), passed through untouched.
    pub source: String,
    /// Validated operation parameters.
    pub params: OperationParams,
}

/// Assets produced by a successful transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    /// The uploaded source image.
    pub source_asset: AssetRef,
    /// The transformed image.
    pub result_asset: AssetRef,
}

/// External image transform service.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    /// Run a transform.
    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, ProviderError>;

    /// Delete a hosted asset.
    async fn delete_asset(&self, asset: &AssetRef) -> Result<(), ProviderError>;
}

/// JSON-over-HTTP transform provider.
#[derive(Debug, Clone)]
pub struct HttpTransformProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransformProvider {
    /// Create a provider client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(TRANSFORM_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TransformProvider for HttpTransformProvider {
    async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, ProviderError> {
        tracing::debug!(kind = %request.kind, "Calling transform provider");

        let response = self
            .client
            .post(format!("{}/transform", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        Ok(Self::check_status(response).await?.json().await?)
    }

    async fn delete_asset(&self, asset: &AssetRef) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/assets/{}", self.base_url, asset.id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixcredit_core::AspectRatio;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn asset_json(id: &str) -> serde_json::Value {
        json!({ "id": id, "url": format!("https://cdn.example/{id}.png") })
    }

    #[tokio::test]
    async fn transform_posts_kind_and_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transform"))
            .and(header("authorization", "Bearer provider-key"))
            .and(body_json(json!({
                "kind": "generative_fill",
                "source": "https://img.example/cat.png",
                "params": { "type": "generative_fill", "aspect_ratio": "16:9" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "source_asset": asset_json("src-1"),
                "result_asset": asset_json("out-1"),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpTransformProvider::new(&server.uri(), "provider-key").unwrap();
        let output = provider
            .transform(&TransformRequest {
                kind: OperationKind::GenerativeFill,
                source: "https://img.example/cat.png".into(),
                params: OperationParams::GenerativeFill {
                    aspect_ratio: AspectRatio::Widescreen,
                },
            })
            .await
            .unwrap();

        assert_eq!(output.result_asset.id, "out-1");
        assert_eq!(output.source_asset.url, "https://cdn.example/src-1.png");
    }

    #[tokio::test]
    async fn transform_failure_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transform"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let provider = HttpTransformProvider::new(&server.uri(), "k").unwrap();
        let err = provider
            .transform(&TransformRequest {
                kind: OperationKind::Restore,
                source: "s".into(),
                params: OperationParams::Restore,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn delete_asset_targets_asset_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/assets/out-9"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpTransformProvider::new(&format!("{}/", server.uri()), "k").unwrap();
        provider
            .delete_asset(&AssetRef {
                id: "out-9".into(),
                url: "https://cdn.example/out-9.png".into(),
            })
            .await
            .unwrap();
    }
}
