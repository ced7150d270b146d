//! Error types and result handling for FleetWatch

use thiserror::Error;

/// Result type alias used throughout the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for FleetWatch operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("database client error: {0}")]
    Database(String),

    #[error("webhook delivery error: {0}")]
    Webhook(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("detection error: {0}")]
    Detection(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the operation that produced this error is meaningful
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Database(_)
        )
    }

    /// Stable category label, used as a metrics dimension
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Network(_) => "network",
            Error::Database(_) => "database",
            Error::Webhook(_) => "webhook",
            Error::Storage(_) => "storage",
            Error::Detection(_) => "detection",
            Error::InvalidRequest(_) => "request",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}
