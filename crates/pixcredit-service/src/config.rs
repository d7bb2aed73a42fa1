//! Service configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use pixcredit_core::OperationCatalog;

/// Default Stripe API version sent when creating ephemeral keys.
pub const DEFAULT_STRIPE_API_VERSION: &str = "2022-11-15";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON or fails validation.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        source: serde_json::Error,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/pixcredit").
    pub data_dir: String,

    /// HS256 secret shared with the auth provider. Without it every
    /// authenticated request is rejected.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer (default: "pixcredit-auth").
    pub auth_issuer: String,

    /// Expected JWT audience (default: "pixcredit").
    pub auth_audience: String,

    /// Admin API key for the reconciliation endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe secret API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe API version used when the client does not send one.
    pub stripe_api_version: String,

    /// Image transform provider base URL (optional).
    pub provider_base_url: Option<String>,

    /// Image transform provider API key (optional).
    pub provider_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Seconds between reconciliation sweeps of deferred deductions.
    pub reconcile_interval_seconds: u64,

    /// Operation kind → credit cost table.
    pub catalog: OperationCatalog,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    api_version: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPERATION_CATALOG_PATH` points at an unreadable
    /// or invalid catalog.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (stripe_api_key, stripe_api_version) = load_stripe_secrets();

        let catalog = match std::env::var("OPERATION_CATALOG_PATH") {
            Ok(path) => load_catalog(Path::new(&path))?,
            Err(_) => OperationCatalog::default(),
        };

        let defaults = Self::default();

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_api_key,
            stripe_api_version: stripe_api_version.unwrap_or(defaults.stripe_api_version),
            provider_base_url: std::env::var("PROVIDER_BASE_URL").ok(),
            provider_api_key: std::env::var("PROVIDER_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_number("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_number("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            reconcile_interval_seconds: env_number("RECONCILE_INTERVAL_SECONDS")
                .unwrap_or(defaults.reconcile_interval_seconds),
            catalog,
        })
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load an operation catalog from a JSON object of `kind → cost`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not JSON, misses a kind or
/// assigns a non-positive cost.
pub fn load_catalog(path: &Path) -> Result<OperationCatalog, ConfigError> {
    let catalog = load_json_file(path)?;
    tracing::info!(path = %path.display(), "Loaded operation catalog");
    Ok(catalog)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        let path = Path::new(path);
        if !path.exists() {
            continue;
        }
        match load_json_file::<StripeSecrets>(path) {
            Ok(secrets) => {
                tracing::info!(path = %path.display(), "Loaded Stripe secrets from file");
                return (Some(secrets.api_key), secrets.api_version);
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable Stripe secrets file"),
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_API_VERSION").ok(),
    )
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/pixcredit".into(),
            auth_jwt_secret: None,
            auth_issuer: "pixcredit-auth".into(),
            auth_audience: "pixcredit".into(),
            admin_api_key: None,
            stripe_api_key: None,
            stripe_api_version: DEFAULT_STRIPE_API_VERSION.into(),
            provider_base_url: None,
            provider_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout_seconds: 60,
            reconcile_interval_seconds: 60,
            catalog: OperationCatalog::default(),
        }
    }
}
