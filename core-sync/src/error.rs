//! Sync error taxonomy
//!
//! Two tiers: item-level errors ([`SyncError::Extraction`],
//! [`SyncError::Enumeration`], [`SyncError::Watch`]) are recorded on the run
//! and skipped, never escalated; infrastructure errors
//! ([`SyncError::Source`], [`SyncError::Persist`]) end the run. Every variant
//! carries string payloads only, so recorded errors clone cheaply into
//! reporter snapshots.

use bridge_traits::{EnumerationWarning, ExtractionError, SourceError, WatchError};
use core_library::PersistError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// `start_sync` named a source id nothing was registered under.
    #[error("no source registered with id '{0}'")]
    UnknownSource(String),

    /// One item could not be extracted. Non-fatal: the locator is skipped
    /// and excluded from deletion inference.
    #[error("extraction failed for {locator}: {message}")]
    Extraction { locator: String, message: String },

    /// One entry was skipped during enumeration. Non-fatal.
    #[error("enumeration skipped an entry: {message}")]
    Enumeration {
        locator: Option<String>,
        message: String,
    },

    /// The change watcher for a source reported trouble. The supervisor
    /// restarts it; the error is surfaced so the condition is visible.
    #[error("watcher for source '{source_id}': {message}")]
    Watch { source_id: String, message: String },

    /// The source as a whole could not be read. Fatal for the run.
    #[error("source failure: {0}")]
    Source(String),

    /// The snapshot store rejected the run's outcome. Fatal after retries.
    #[error("persistence failure: {0}")]
    Persist(String),

    /// A state change the run lifecycle does not permit.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// `start_incremental` was handed no events; there is nothing to run
    /// and superseding an active run over it would be destructive.
    #[error("change batch is empty")]
    EmptyChangeBatch,
}

impl SyncError {
    /// Wrap a watcher failure with the source it belongs to.
    pub fn watch(source_id: impl Into<String>, error: &WatchError) -> Self {
        Self::Watch {
            source_id: source_id.into(),
            message: error.to_string(),
        }
    }
}

impl From<ExtractionError> for SyncError {
    fn from(e: ExtractionError) -> Self {
        Self::Extraction {
            locator: e.locator().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<EnumerationWarning> for SyncError {
    fn from(w: EnumerationWarning) -> Self {
        Self::Enumeration {
            locator: w.locator.clone(),
            message: w.message,
        }
    }
}

impl From<SourceError> for SyncError {
    fn from(e: SourceError) -> Self {
        Self::Source(e.to_string())
    }
}

impl From<PersistError> for SyncError {
    fn from(e: PersistError) -> Self {
        Self::Persist(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
