//! Platform Index Source
//!
//! Adapts a host-provided [`MediaIndex`] to the [`MediaSource`] contract.
//! Mobile platforms do not hand applications a filesystem; they hand them
//! a pre-parsed content index addressed by stable URIs. This source walks
//! that index page by page and turns its entries into tracks.
//!
//! ## Overview
//!
//! - Enumeration pages through the index lazily; pages are fetched on
//!   demand as the consumer drains the stream
//! - Extraction is a single-entry lookup, no byte-level parsing
//! - Index text is re-normalized on the way through; hosts are not
//!   trusted to honor the trimming convention
//! - A page failure mid-traversal ends the stream with a fatal marker so
//!   the incomplete listing is never mistaken for a complete one

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, ChangeStream, EnumerationEntry, EnumerationStream, ExtractedTrack,
    ExtractionError, IndexEntry, Locator, MediaIndex, MediaSource, RawChangeEvent, ScopeKind,
    SourceError, SourceId, SourceKind, SyncScope, WatchError, CHANGE_CHANNEL_CAPACITY,
};
use core_metadata::normalize_text;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default number of entries requested per index page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A media source backed by the platform content index.
pub struct PlatformIndexSource {
    id: SourceId,
    index: Arc<dyn MediaIndex>,
    page_size: usize,
}

impl PlatformIndexSource {
    pub fn new(id: SourceId, index: Arc<dyn MediaIndex>) -> Self {
        Self {
            id,
            index,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the page size. Values below 1 are clamped up.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Translate a scope into an optional URI prefix filter.
    fn scope_filter(&self, scope: &SyncScope) -> Result<Option<String>, SourceError> {
        if scope.source_id != self.id {
            return Err(SourceError::UnsupportedScope(format!(
                "scope targets source '{}', this source is '{}'",
                scope.source_id, self.id
            )));
        }

        match &scope.kind {
            ScopeKind::Full => Ok(None),
            ScopeKind::Subtree(Locator::Uri(prefix)) => Ok(Some(prefix.clone())),
            ScopeKind::Subtree(other) => Err(SourceError::UnsupportedScope(format!(
                "subtree locator '{}' is not an index uri",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for PlatformIndexSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformIndexSource")
            .field("id", &self.id)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[async_trait]
impl MediaSource for PlatformIndexSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ContentIndex
    }

    #[instrument(skip(self, scope), fields(source = %self.id))]
    async fn enumerate(&self, scope: &SyncScope) -> Result<EnumerationStream, SourceError> {
        let filter = self.scope_filter(scope)?;

        // The first page is fetched eagerly so a dead index fails the run
        // up front instead of producing an empty-looking enumeration.
        let first = self
            .index
            .query_page(None, self.page_size)
            .await
            .map_err(|e| SourceError::RootUnavailable(format!("index query failed: {}", e)))?;

        debug!(page_size = self.page_size, "Starting index enumeration");

        let (tx, stream) = EnumerationStream::channel();
        let index = Arc::clone(&self.index);
        let page_size = self.page_size;

        tokio::spawn(async move {
            let mut page = first;
            loop {
                for entry in page.entries {
                    let in_scope = filter
                        .as_deref()
                        .map(|p| entry.uri.starts_with(p))
                        .unwrap_or(true);
                    if !in_scope {
                        continue;
                    }
                    if tx
                        .send(EnumerationEntry::Item(Locator::Uri(entry.uri)))
                        .await
                        .is_err()
                    {
                        debug!("Enumeration receiver dropped, aborting traversal");
                        return;
                    }
                }

                let Some(cursor) = page.next_cursor else {
                    break;
                };

                page = match index.query_page(Some(&cursor), page_size).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "Index page fetch failed mid-traversal");
                        let _ = tx
                            .send(EnumerationEntry::Failed(SourceError::Backend(format!(
                                "index page fetch failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
            }
        });

        Ok(stream)
    }

    async fn extract(&self, locator: &Locator) -> Result<ExtractedTrack, ExtractionError> {
        let key = locator.as_key();
        let Locator::Uri(uri) = locator else {
            return Err(ExtractionError::UnreadableSource {
                locator: key,
                message: "not an index uri".to_string(),
            });
        };

        let entry = self
            .index
            .get_entry(uri)
            .await
            .map_err(|e| ExtractionError::UnreadableSource {
                locator: key.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ExtractionError::UnreadableSource {
                locator: key.clone(),
                message: "entry no longer present in index".to_string(),
            })?;

        Ok(entry_to_track(locator.clone(), entry))
    }

    fn supports_watch(&self) -> bool {
        self.index.supports_change_feed()
    }

    #[instrument(skip(self, scope), fields(source = %self.id))]
    async fn watch(&self, scope: &SyncScope) -> Result<ChangeStream, WatchError> {
        let filter = self
            .scope_filter(scope)
            .map_err(|e| WatchError::Initialization(e.to_string()))?;

        let mut feed = self.index.change_feed().await.map_err(|e| match e {
            BridgeError::NotAvailable(_) => WatchError::Unsupported,
            other => WatchError::Initialization(other.to_string()),
        })?;

        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    change = feed.recv() => {
                        let Some(change) = change else { break };
                        let in_scope = filter
                            .as_deref()
                            .map(|p| change.uri.starts_with(p))
                            .unwrap_or(true);
                        if !in_scope {
                            continue;
                        }
                        let event = RawChangeEvent::new(Locator::Uri(change.uri), change.kind);
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Index change feed closed");
        });

        Ok(ChangeStream::new(rx, token))
    }
}

/// Build a track from an index entry, re-applying the text and numeric
/// conventions regardless of what the host delivered.
fn entry_to_track(locator: Locator, entry: IndexEntry) -> ExtractedTrack {
    let mut track = ExtractedTrack::new(locator, entry.modified_at);
    track.title = entry.title.as_deref().and_then(normalize_text);
    track.album_title = entry.album_title.as_deref().and_then(normalize_text);
    track.artist_name = entry.artist_name.as_deref().and_then(normalize_text);
    track.genre_name = entry.genre_name.as_deref().and_then(normalize_text);
    track.duration_ms = entry.duration_ms.filter(|&d| d > 0);
    track.track_number = entry.track_number.filter(|&n| n > 0);
    track.disc_number = entry.disc_number.filter(|&n| n > 0);
    track.artwork_ref = entry.artwork_uri;
    track.album_upstream_id = entry.album_upstream_id.as_deref().and_then(normalize_text);
    track.artist_upstream_id = entry.artist_upstream_id.as_deref().and_then(normalize_text);
    track.genre_upstream_id = entry.genre_upstream_id.as_deref().and_then(normalize_text);
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{ChangeKind, IndexChange, IndexPage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn entry(uri: &str) -> IndexEntry {
        IndexEntry {
            uri: uri.to_string(),
            title: Some(format!("Track {}", uri)),
            album_title: None,
            artist_name: None,
            genre_name: None,
            duration_ms: Some(180_000),
            track_number: None,
            disc_number: None,
            modified_at: 1_700_000_000_000,
            size_bytes: Some(4096),
            album_upstream_id: None,
            artist_upstream_id: None,
            genre_upstream_id: None,
            artwork_uri: None,
        }
    }

    /// Offset-cursor index with an optional page that errors, plus an
    /// optional pre-loaded change feed.
    struct InMemoryIndex {
        entries: Vec<IndexEntry>,
        calls: AtomicUsize,
        fail_page: Option<usize>,
        feed: Mutex<Option<mpsc::Receiver<IndexChange>>>,
    }

    impl InMemoryIndex {
        fn new(entries: Vec<IndexEntry>) -> Self {
            Self {
                entries,
                calls: AtomicUsize::new(0),
                fail_page: None,
                feed: Mutex::new(None),
            }
        }

        fn failing_at_page(mut self, page: usize) -> Self {
            self.fail_page = Some(page);
            self
        }

        fn with_feed(self, rx: mpsc::Receiver<IndexChange>) -> Self {
            *self.feed.lock().unwrap() = Some(rx);
            self
        }
    }

    #[async_trait]
    impl MediaIndex for InMemoryIndex {
        async fn query_page(
            &self,
            cursor: Option<&str>,
            limit: usize,
        ) -> bridge_traits::Result<IndexPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            if self.fail_page == Some(start / limit.max(1)) {
                return Err(BridgeError::OperationFailed("index offline".to_string()));
            }

            let end = (start + limit).min(self.entries.len());
            let entries = self.entries[start..end].to_vec();
            let next_cursor = (end < self.entries.len()).then(|| end.to_string());
            Ok(IndexPage {
                entries,
                next_cursor,
            })
        }

        async fn get_entry(&self, uri: &str) -> bridge_traits::Result<Option<IndexEntry>> {
            Ok(self.entries.iter().find(|e| e.uri == uri).cloned())
        }

        fn supports_change_feed(&self) -> bool {
            self.feed.lock().unwrap().is_some()
        }

        async fn change_feed(&self) -> bridge_traits::Result<mpsc::Receiver<IndexChange>> {
            self.feed
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BridgeError::NotAvailable("index change feed".to_string()))
        }
    }

    fn source_over(index: InMemoryIndex, page_size: usize) -> PlatformIndexSource {
        PlatformIndexSource::new(SourceId::new("platform"), Arc::new(index))
            .with_page_size(page_size)
    }

    async fn drain(mut stream: EnumerationStream) -> Vec<EnumerationEntry> {
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            out.push(entry);
        }
        out
    }

    #[tokio::test]
    async fn test_enumerate_walks_all_pages() {
        let uris = ["c://1", "c://2", "c://3", "c://4", "c://5"];
        let index = InMemoryIndex::new(uris.iter().map(|u| entry(u)).collect());
        let source = source_over(index, 2);

        let scope = SyncScope::full(SourceId::new("platform"));
        let stream = source.enumerate(&scope).await.unwrap();
        let entries = drain(stream).await;

        let items: Vec<_> = entries
            .iter()
            .filter(|e| matches!(e, EnumerationEntry::Item(_)))
            .collect();
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_enumerate_subtree_filters_by_prefix() {
        let index = InMemoryIndex::new(vec![
            entry("content://a/1"),
            entry("content://a/2"),
            entry("content://b/3"),
        ]);
        let source = source_over(index, 10);

        let scope = SyncScope::subtree(
            SourceId::new("platform"),
            Locator::Uri("content://a".to_string()),
        );
        let stream = source.enumerate(&scope).await.unwrap();
        let entries = drain(stream).await;

        assert_eq!(entries.len(), 2);
        for e in &entries {
            match e {
                EnumerationEntry::Item(Locator::Uri(uri)) => {
                    assert!(uri.starts_with("content://a"))
                }
                other => panic!("unexpected entry: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_enumerate_rejects_path_subtree() {
        let source = source_over(InMemoryIndex::new(vec![]), 10);
        let scope = SyncScope::subtree(
            SourceId::new("platform"),
            Locator::Path(std::path::PathBuf::from("/music")),
        );

        let err = source.enumerate(&scope).await.err().unwrap();
        assert!(matches!(err, SourceError::UnsupportedScope(_)));
    }

    #[tokio::test]
    async fn test_unreachable_index_fails_up_front() {
        let index = InMemoryIndex::new(vec![entry("c://1")]).failing_at_page(0);
        let source = source_over(index, 10);

        let scope = SyncScope::full(SourceId::new("platform"));
        let err = source.enumerate(&scope).await.err().unwrap();
        assert!(matches!(err, SourceError::RootUnavailable(_)));
    }

    #[tokio::test]
    async fn test_mid_traversal_failure_ends_with_failed_marker() {
        let uris = ["c://1", "c://2", "c://3", "c://4"];
        let index =
            InMemoryIndex::new(uris.iter().map(|u| entry(u)).collect()).failing_at_page(1);
        let source = source_over(index, 2);

        let scope = SyncScope::full(SourceId::new("platform"));
        let stream = source.enumerate(&scope).await.unwrap();
        let entries = drain(stream).await;

        // First page delivered, then the fatal marker, then nothing
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], EnumerationEntry::Item(_)));
        assert!(matches!(entries[1], EnumerationEntry::Item(_)));
        assert!(matches!(
            entries[2],
            EnumerationEntry::Failed(SourceError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_normalizes_host_data() {
        let mut raw = entry("c://1");
        raw.title = Some("  Neat   Title ".to_string());
        raw.artist_name = Some("   ".to_string());
        raw.track_number = Some(0);
        raw.duration_ms = Some(0);
        raw.artwork_uri = Some("content://art/9".to_string());
        let index = InMemoryIndex::new(vec![raw]);
        let source = source_over(index, 10);

        let track = source
            .extract(&Locator::Uri("c://1".to_string()))
            .await
            .unwrap();

        assert_eq!(track.title, Some("Neat Title".to_string()));
        assert_eq!(track.artist_name, None);
        assert_eq!(track.track_number, None);
        assert_eq!(track.duration_ms, None);
        assert_eq!(track.artwork_ref, Some("content://art/9".to_string()));
        assert_eq!(track.modified_at, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_extract_vanished_entry_is_unreadable() {
        let source = source_over(InMemoryIndex::new(vec![]), 10);

        let err = source
            .extract(&Locator::Uri("c://gone".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnreadableSource { .. }));
    }

    #[tokio::test]
    async fn test_watch_forwards_and_filters_feed() {
        let (feed_tx, feed_rx) = mpsc::channel(8);
        let index = InMemoryIndex::new(vec![]).with_feed(feed_rx);
        let source = source_over(index, 10);
        assert!(source.supports_watch());

        let scope = SyncScope::subtree(
            SourceId::new("platform"),
            Locator::Uri("content://a".to_string()),
        );
        let mut stream = source.watch(&scope).await.unwrap();

        feed_tx
            .send(IndexChange {
                uri: "content://b/out-of-scope".to_string(),
                kind: ChangeKind::Created,
            })
            .await
            .unwrap();
        feed_tx
            .send(IndexChange {
                uri: "content://a/in-scope".to_string(),
                kind: ChangeKind::Modified,
            })
            .await
            .unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(
            event.locator,
            Locator::Uri("content://a/in-scope".to_string())
        );
        assert_eq!(event.kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_watch_without_feed_is_unsupported() {
        let source = source_over(InMemoryIndex::new(vec![]), 10);
        assert!(!source.supports_watch());

        let scope = SyncScope::full(SourceId::new("platform"));
        let err = source.watch(&scope).await.err().unwrap();
        assert!(matches!(err, WatchError::Unsupported));
    }
}
