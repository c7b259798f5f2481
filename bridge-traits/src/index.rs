//! # Platform Media Index
//!
//! Abstraction over a platform-provided content index (the kind mobile
//! platforms expose instead of raw filesystem access). The engine never
//! talks to platform APIs directly; a host shell implements [`MediaIndex`]
//! and the `provider-index` source adapts it to the [`MediaSource`]
//! contract.
//!
//! Entries are addressed by stable URI and come back pre-parsed: the index
//! already extracted tag metadata, so the source-side extractor is a cheap
//! lookup rather than a byte-level parse.
//!
//! [`MediaSource`]: crate::source::MediaSource

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::source::ChangeKind;

/// One entry of the platform index, as the platform reports it.
///
/// Text fields follow the same convention as extraction output: trimmed,
/// with empty represented as `None`. Numeric fields the platform does not
/// know are `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Stable URI of the item; survives rescans and reboots.
    pub uri: String,
    pub title: Option<String>,
    pub album_title: Option<String>,
    pub artist_name: Option<String>,
    pub genre_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    /// Last-modified time, unix milliseconds.
    pub modified_at: i64,
    pub size_bytes: Option<i64>,
    /// Platform-assigned album identity, when the index groups natively.
    pub album_upstream_id: Option<String>,
    pub artist_upstream_id: Option<String>,
    pub genre_upstream_id: Option<String>,
    /// URI of platform-resolved artwork for this entry, when available.
    pub artwork_uri: Option<String>,
}

/// One page of index entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPage {
    pub entries: Vec<IndexEntry>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// A change notification from the platform index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChange {
    pub uri: String,
    pub kind: ChangeKind,
}

/// Host-implemented access to the platform content index.
#[async_trait]
pub trait MediaIndex: Send + Sync {
    /// Fetch one page of entries.
    ///
    /// Passing `None` as the cursor starts a fresh traversal; the returned
    /// page carries the cursor for the next call. Implementations must
    /// tolerate a stale cursor by restarting from the beginning rather
    /// than failing the traversal.
    async fn query_page(&self, cursor: Option<&str>, limit: usize) -> Result<IndexPage>;

    /// Look up a single entry by URI. `Ok(None)` means the entry no longer
    /// exists in the index.
    async fn get_entry(&self, uri: &str) -> Result<Option<IndexEntry>>;

    /// Whether this index can push change notifications.
    fn supports_change_feed(&self) -> bool {
        false
    }

    /// Subscribe to index changes.
    ///
    /// The feed stays open until the receiver is dropped. Indexes without
    /// native notifications keep the default, which reports
    /// [`BridgeError::NotAvailable`].
    async fn change_feed(&self) -> Result<mpsc::Receiver<IndexChange>> {
        Err(BridgeError::NotAvailable(
            "index change feed".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticIndex;

    #[async_trait]
    impl MediaIndex for StaticIndex {
        async fn query_page(&self, _cursor: Option<&str>, _limit: usize) -> Result<IndexPage> {
            Ok(IndexPage {
                entries: vec![],
                next_cursor: None,
            })
        }

        async fn get_entry(&self, _uri: &str) -> Result<Option<IndexEntry>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_change_feed_defaults_to_not_available() {
        let index = StaticIndex;
        assert!(!index.supports_change_feed());
        let err = index.change_feed().await.unwrap_err();
        assert!(matches!(err, BridgeError::NotAvailable(_)));
    }
}
