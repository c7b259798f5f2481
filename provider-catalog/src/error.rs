//! Error types for the remote catalog provider

use thiserror::Error;

/// Remote catalog provider errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// API request returned an error status
    #[error("Catalog API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Network-level failure (connect, TLS, timeout)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

impl CatalogError {
    /// Whether this failure names a track the catalog no longer has.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status_code: 404, .. })
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;
