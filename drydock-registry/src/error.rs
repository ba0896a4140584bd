//! Error types for the registry client

use drydock_core::domain::image::ImageReferenceError;
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while resolving a remote digest
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Registry returned an unexpected status code
    #[error("registry error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Manifest does not exist
    #[error("manifest not found: {0}")]
    NotFound(String),

    /// Registry refused our credentials or token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Token endpoint answered without a usable token
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Manifest response carried no digest and no body to hash
    #[error("registry returned no digest for {0}")]
    MissingDigest(String),

    /// Image reference could not be parsed
    #[error(transparent)]
    InvalidReference(#[from] ImageReferenceError),
}

impl RegistryError {
    /// Create a status error from code and message
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Check whether retrying later may succeed (network, 429, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::TokenExchange(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Status { status: 404, .. })
    }
}
