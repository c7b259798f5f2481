//! Remote Catalog Source
//!
//! Adapts [`CatalogConnector`] to the [`MediaSource`] contract. The
//! catalog namespace is flat: locators are catalog track ids, there is no
//! subtree structure, and there are no change notifications. Catalogs are
//! re-synced by fresh full enumerations.
//!
//! Listing pages already carry full descriptors, so enumeration stashes
//! them in a per-source cache and extraction serves from it, falling back
//! to a single-track fetch only for locators that never appeared in a
//! listing (change-driven lookups, stale cache).

use async_trait::async_trait;
use bridge_traits::{
    EnumerationEntry, EnumerationStream, ExtractedTrack, ExtractionError, Locator, MediaSource,
    ScopeKind, SourceError, SourceId, SourceKind, SyncScope,
};
use chrono::{DateTime, Utc};
use core_metadata::normalize_text;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::connector::CatalogConnector;
use crate::types::CatalogTrack;

/// A media source backed by a remote catalog API.
pub struct RemoteCatalogSource {
    id: SourceId,
    connector: Arc<CatalogConnector>,
    /// Descriptors seen by the most recent enumeration, keyed by track id.
    listing_cache: Arc<Mutex<HashMap<String, CatalogTrack>>>,
}

impl RemoteCatalogSource {
    pub fn new(id: SourceId, connector: CatalogConnector) -> Self {
        Self {
            id,
            connector: Arc::new(connector),
            listing_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check_scope(&self, scope: &SyncScope) -> Result<(), SourceError> {
        if scope.source_id != self.id {
            return Err(SourceError::UnsupportedScope(format!(
                "scope targets source '{}', this source is '{}'",
                scope.source_id, self.id
            )));
        }
        match &scope.kind {
            ScopeKind::Full => Ok(()),
            ScopeKind::Subtree(_) => Err(SourceError::UnsupportedScope(
                "catalog namespace is flat, subtree scopes are not supported".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for RemoteCatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCatalogSource")
            .field("id", &self.id)
            .field("connector", &self.connector)
            .finish()
    }
}

#[async_trait]
impl MediaSource for RemoteCatalogSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RemoteCatalog
    }

    #[instrument(skip(self, scope), fields(source = %self.id))]
    async fn enumerate(&self, scope: &SyncScope) -> Result<EnumerationStream, SourceError> {
        self.check_scope(scope)?;

        if !self.connector.ping().await {
            return Err(SourceError::RootUnavailable(
                "catalog unreachable".to_string(),
            ));
        }

        let first = self
            .connector
            .list_tracks(None)
            .await
            .map_err(|e| SourceError::RootUnavailable(format!("catalog listing failed: {}", e)))?;

        debug!("Starting catalog enumeration");

        // Fresh traversal, fresh cache
        self.listing_cache.lock().await.clear();

        let (tx, stream) = EnumerationStream::channel();
        let connector = Arc::clone(&self.connector);
        let cache = Arc::clone(&self.listing_cache);

        tokio::spawn(async move {
            let (mut tracks, mut next) = first;
            loop {
                for track in tracks {
                    let id = track.id.clone();
                    cache.lock().await.insert(id.clone(), track);
                    if tx
                        .send(EnumerationEntry::Item(Locator::Remote(id)))
                        .await
                        .is_err()
                    {
                        debug!("Enumeration receiver dropped, aborting traversal");
                        return;
                    }
                }

                let Some(cursor) = next else { break };

                match connector.list_tracks(Some(&cursor)).await {
                    Ok((page_tracks, page_next)) => {
                        tracks = page_tracks;
                        next = page_next;
                    }
                    Err(e) => {
                        warn!(error = %e, "Catalog page fetch failed mid-traversal");
                        let _ = tx
                            .send(EnumerationEntry::Failed(SourceError::Backend(format!(
                                "catalog page fetch failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    async fn extract(&self, locator: &Locator) -> Result<ExtractedTrack, ExtractionError> {
        let key = locator.as_key();
        let Locator::Remote(track_id) = locator else {
            return Err(ExtractionError::UnreadableSource {
                locator: key,
                message: "not a catalog track id".to_string(),
            });
        };

        if let Some(descriptor) = self.listing_cache.lock().await.get(track_id).cloned() {
            return Ok(track_from_descriptor(locator.clone(), descriptor));
        }

        let descriptor = self.connector.get_track(track_id).await.map_err(|e| {
            if e.is_not_found() {
                ExtractionError::UnreadableSource {
                    locator: key.clone(),
                    message: "track no longer in catalog".to_string(),
                }
            } else {
                ExtractionError::UnreadableSource {
                    locator: key.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        Ok(track_from_descriptor(locator.clone(), descriptor))
    }
}

/// Parse an RFC 3339 timestamp into unix milliseconds.
fn parse_timestamp_ms(rfc3339: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Build a track from a catalog descriptor, applying the text and
/// numeric conventions. A descriptor without a usable timestamp gets
/// `modified_at` 0; its checksum then carries the freshness signal.
fn track_from_descriptor(locator: Locator, descriptor: CatalogTrack) -> ExtractedTrack {
    let modified_at = descriptor
        .updated_at
        .as_deref()
        .and_then(parse_timestamp_ms)
        .unwrap_or(0);

    let mut track = ExtractedTrack::new(locator, modified_at);
    track.title = descriptor.title.as_deref().and_then(normalize_text);
    track.album_title = descriptor.album.as_deref().and_then(normalize_text);
    track.artist_name = descriptor.artist.as_deref().and_then(normalize_text);
    track.genre_name = descriptor.genre.as_deref().and_then(normalize_text);
    track.duration_ms = descriptor.duration_ms.filter(|&d| d > 0);
    track.track_number = descriptor.track_number.filter(|&n| n > 0);
    track.disc_number = descriptor.disc_number.filter(|&n| n > 0);
    track.content_fingerprint = descriptor.checksum.as_deref().and_then(normalize_text);
    track.artwork_ref = descriptor.artwork_url;
    track.album_upstream_id = descriptor.album_id.as_deref().and_then(normalize_text);
    track.artist_upstream_id = descriptor.artist_id.as_deref().and_then(normalize_text);
    track.genre_upstream_id = descriptor.genre_id.as_deref().and_then(normalize_text);
    track
}
