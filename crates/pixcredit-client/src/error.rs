//! Client error types.

/// Errors that can occur when using the pixcredit client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The operation costs more than the available credits.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Cost of the operation.
        required: i64,
        /// Credits available.
        available: i64,
    },

    /// The account, operation or intent does not exist for this user.
    #[error("not found: {0}")]
    NotFound(String),

    /// The token was missing, expired or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
