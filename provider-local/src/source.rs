//! Local Filesystem Source
//!
//! [`LocalFilesystemSource`] exposes a directory tree of audio files as a
//! [`MediaSource`]: recursive enumeration via `walkdir`, per-file tag
//! extraction via `core-metadata`, and change watching via `notify`.
//!
//! ## Overview
//!
//! - Enumeration runs on a blocking task and feeds a bounded channel, so
//!   arbitrarily large trees never buffer in memory
//! - Unreadable entries (permission holes, broken symlinks) surface as
//!   warnings and the traversal continues; an unreadable root fails the run
//! - Locators are the absolute paths walkdir hands back, which keeps the
//!   canonical key stable across rescans

use async_trait::async_trait;
use bridge_traits::{
    ChangeStream, ContentKind, EnumerationEntry, EnumerationStream, EnumerationWarning,
    ExtractedTrack, ExtractionError, Locator, MediaSource, ScopeKind, SourceError, SourceId,
    SourceKind, SyncScope, WatchError,
};
use core_metadata::MetadataExtractor;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::watcher::spawn_change_stream;

/// A configured local-filesystem source rooted at a single directory.
pub struct LocalFilesystemSource {
    id: SourceId,
    root: PathBuf,
    extensions: Vec<String>,
    extractor: MetadataExtractor,
}

impl LocalFilesystemSource {
    /// Create a source over `root` with the default audio extension set.
    ///
    /// `root` must be absolute; configuration validation enforces this
    /// before a source is ever constructed.
    pub fn new(id: SourceId, root: PathBuf) -> Self {
        Self {
            id,
            root,
            extensions: ContentKind::default_audio_extensions(),
            extractor: MetadataExtractor::new(),
        }
    }

    /// Replace the enumerated extension set. Extensions are matched
    /// case-insensitively.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Enable or disable content fingerprinting during extraction.
    pub fn fingerprinting(mut self, enabled: bool) -> Self {
        self.extractor = self.extractor.fingerprinting(enabled);
        self
    }

    /// The configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the directory a scope maps to, rejecting scopes that leave
    /// the configured root.
    fn resolve_scope_dir(&self, scope: &SyncScope) -> Result<PathBuf, SourceError> {
        if scope.source_id != self.id {
            return Err(SourceError::UnsupportedScope(format!(
                "scope targets source '{}', this source is '{}'",
                scope.source_id, self.id
            )));
        }

        match &scope.kind {
            ScopeKind::Full => Ok(self.root.clone()),
            ScopeKind::Subtree(locator) => {
                let path = locator.as_path().ok_or_else(|| {
                    SourceError::UnsupportedScope(format!(
                        "subtree locator '{}' is not a filesystem path",
                        locator
                    ))
                })?;
                if !path.starts_with(&self.root) {
                    return Err(SourceError::UnsupportedScope(format!(
                        "subtree '{}' lies outside root '{}'",
                        path.display(),
                        self.root.display()
                    )));
                }
                Ok(path.to_path_buf())
            }
        }
    }
}

impl std::fmt::Debug for LocalFilesystemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFilesystemSource")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("extensions", &self.extensions)
            .finish()
    }
}

#[async_trait]
impl MediaSource for LocalFilesystemSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LocalFilesystem
    }

    #[instrument(skip(self, scope), fields(source = %self.id))]
    async fn enumerate(&self, scope: &SyncScope) -> Result<EnumerationStream, SourceError> {
        let start = self.resolve_scope_dir(scope)?;

        let metadata = tokio::fs::metadata(&start)
            .await
            .map_err(|e| SourceError::RootUnavailable(format!("{}: {}", start.display(), e)))?;

        // An unreadable root is fatal; unreadable entries below it are not.
        if metadata.is_dir() {
            tokio::fs::read_dir(&start)
                .await
                .map_err(|e| SourceError::RootUnavailable(format!("{}: {}", start.display(), e)))?;
        }

        debug!(start = %start.display(), "Starting filesystem enumeration");

        let (tx, stream) = EnumerationStream::channel();
        let extensions = self.extensions.clone();

        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&start).follow_links(false) {
                let sent = match entry {
                    Ok(entry) => {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let path = entry.into_path();
                        if !matches_extension(&path, &extensions) {
                            continue;
                        }
                        tx.blocking_send(EnumerationEntry::Item(Locator::Path(path)))
                    }
                    Err(e) => {
                        let locator = e
                            .path()
                            .map(|p| Locator::Path(p.to_path_buf()).as_key());
                        warn!(error = %e, "Skipping unreadable entry");
                        tx.blocking_send(EnumerationEntry::Warning(EnumerationWarning::new(
                            locator,
                            e.to_string(),
                        )))
                    }
                };

                // A dropped receiver means the consumer abandoned the run
                if sent.is_err() {
                    debug!("Enumeration receiver dropped, aborting traversal");
                    return;
                }
            }
        });

        Ok(stream)
    }

    async fn extract(&self, locator: &Locator) -> Result<ExtractedTrack, ExtractionError> {
        self.extractor.extract(locator).await
    }

    fn supports_watch(&self) -> bool {
        true
    }

    #[instrument(skip(self, scope), fields(source = %self.id))]
    async fn watch(&self, scope: &SyncScope) -> Result<ChangeStream, WatchError> {
        let dir = self
            .resolve_scope_dir(scope)
            .map_err(|e| WatchError::Initialization(e.to_string()))?;

        spawn_change_stream(dir, self.extensions.clone())
    }
}

/// Case-insensitive extension membership test.
pub(crate) fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x == &e.to_ascii_lowercase()))
        .unwrap_or(false)
}
