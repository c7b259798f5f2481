use thiserror::Error;

/// Errors produced by capability implementations behind the bridge traits.
///
/// Component crates define their own richer error enums; this one covers
/// the generic cases a platform capability can hit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
