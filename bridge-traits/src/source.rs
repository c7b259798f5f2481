//! # Media Source Capability
//!
//! The contract between the sync engine and the places media can come from.
//!
//! ## Overview
//!
//! A [`MediaSource`] bundles the three capabilities the engine needs from a
//! source variant:
//!
//! - `enumerate` - a lazy, finite, restartable traversal of the scope,
//!   delivered over a bounded channel as [`EnumerationStream`]
//! - `extract` - metadata for a single [`Locator`], as [`ExtractedTrack`]
//! - `watch` - an unbounded feed of [`RawChangeEvent`]s, active until stopped
//!
//! Variants are selected by configuration, not by runtime type inspection:
//! the engine holds `Arc<dyn MediaSource>` and never downcasts. Sources that
//! cannot watch (e.g. a remote catalog) keep the default `watch`
//! implementation, which reports [`WatchError::Unsupported`].
//!
//! ## Identity
//!
//! Track identity is derived from [`Locator::as_key`], a canonical string
//! form that must be byte-identical across enumerations of the same
//! unchanged item. Implementations must therefore hand out locators in a
//! normalized form (absolute paths, stable URIs) rather than whatever the
//! underlying OS happened to return.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use thiserror::Error;

/// Default capacity of the enumeration channel.
pub const ENUMERATION_CHANNEL_CAPACITY: usize = 256;

/// Default capacity of the raw change-event channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Identifiers & locators
// =============================================================================

/// Identifier of a configured source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque reference to a single item within a source.
///
/// The canonical string form ([`Locator::as_key`]) is what track identity is
/// hashed from, so it must be stable across rescans and OS restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Locator {
    /// Absolute path on a local filesystem.
    Path(PathBuf),
    /// Stable URI of a platform media-index entry.
    Uri(String),
    /// Descriptor id within a remote catalog.
    Remote(String),
}

impl Locator {
    /// Canonical string form, used for identity hashing and persistence.
    pub fn as_key(&self) -> String {
        match self {
            Self::Path(p) => format!("path:{}", p.display()),
            Self::Uri(u) => format!("uri:{}", u),
            Self::Remote(r) => format!("remote:{}", r),
        }
    }

    /// Parse a locator back from its canonical string form.
    pub fn from_key(key: &str) -> Option<Self> {
        let (prefix, rest) = key.split_once(':')?;
        match prefix {
            "path" => Some(Self::Path(PathBuf::from(rest))),
            "uri" => Some(Self::Uri(rest.to_string())),
            "remote" => Some(Self::Remote(rest.to_string())),
            _ => None,
        }
    }

    /// The filesystem path, when this locator points at a local file.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Whether this locator falls under `prefix`.
    ///
    /// Path locators compare component-wise; URI and remote locators compare
    /// by string prefix. Locators of different kinds never match.
    pub fn starts_with(&self, prefix: &Locator) -> bool {
        match (self, prefix) {
            (Self::Path(p), Self::Path(pre)) => p.starts_with(pre),
            (Self::Uri(u), Self::Uri(pre)) => u.starts_with(pre.as_str()),
            (Self::Remote(r), Self::Remote(pre)) => r.starts_with(pre.as_str()),
            _ => false,
        }
    }

    /// File stem of the underlying item, used as a last-resort title.
    pub fn stem(&self) -> Option<String> {
        match self {
            Self::Path(p) => p.file_stem().map(|s| s.to_string_lossy().into_owned()),
            Self::Uri(u) | Self::Remote(u) => u
                .rsplit('/')
                .next()
                .map(|s| s.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(s))
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

/// Kind of source a [`MediaSource`] implementation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    LocalFilesystem,
    ContentIndex,
    RemoteCatalog,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalFilesystem => "local-filesystem",
            Self::ContentIndex => "content-index",
            Self::RemoteCatalog => "remote-catalog",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse media classification derived from a locator, used to split
/// progress counters per content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentKind {
    Audio,
    Video,
    Image,
    Other,
}

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "wma", "aiff", "aif", "alac",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "webm", "m4v", "mov"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

impl ContentKind {
    /// Classify by file extension. Locators without a recognizable
    /// extension (content URIs, catalog descriptors) default to `Audio`,
    /// since that is what this engine syncs.
    pub fn from_locator(locator: &Locator) -> Self {
        let key = locator.as_key();
        let ext = key.rsplit('.').next().map(|e| e.to_ascii_lowercase());
        match ext {
            Some(e) if AUDIO_EXTENSIONS.contains(&e.as_str()) => Self::Audio,
            Some(e) if VIDEO_EXTENSIONS.contains(&e.as_str()) => Self::Video,
            Some(e) if IMAGE_EXTENSIONS.contains(&e.as_str()) => Self::Image,
            Some(_) if matches!(locator, Locator::Path(_)) => Self::Other,
            _ => Self::Audio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Image => "image",
            Self::Other => "other",
        }
    }

    /// The default extension set enumerated by file-based sources.
    pub fn default_audio_extensions() -> Vec<String> {
        AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Scope
// =============================================================================

/// What part of a source a sync run covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    pub source_id: SourceId,
    pub kind: ScopeKind,
}

/// Breadth of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    /// The source's entire configured root. Only full-scope runs may infer
    /// deletions from absence.
    Full,
    /// A subtree under the configured root; deletions are confined to it.
    Subtree(Locator),
}

impl SyncScope {
    pub fn full(source_id: SourceId) -> Self {
        Self {
            source_id,
            kind: ScopeKind::Full,
        }
    }

    pub fn subtree(source_id: SourceId, root: Locator) -> Self {
        Self {
            source_id,
            kind: ScopeKind::Subtree(root),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self.kind, ScopeKind::Full)
    }
}

// =============================================================================
// Extraction output
// =============================================================================

/// Raw metadata extracted from one source item.
///
/// All text fields are trimmed; empty strings are represented as `None`.
/// Missing numeric tags are `None`, never zero, so that absent values can
/// never collide during grouping. Sources with authoritative grouping
/// identifiers (a catalog's album id, a platform index's artist id) carry
/// them in the `*_upstream_id` fields; file-based sources leave them `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTrack {
    pub locator: Locator,
    pub title: Option<String>,
    pub album_title: Option<String>,
    pub artist_name: Option<String>,
    pub genre_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    /// Source-side last-modified time, unix milliseconds.
    pub modified_at: i64,
    /// Hex SHA-256 of the content bytes, when the source computes one.
    pub content_fingerprint: Option<String>,
    /// Reference to artwork (sidecar file path, embedded marker, or URL).
    pub artwork_ref: Option<String>,
    pub album_upstream_id: Option<String>,
    pub artist_upstream_id: Option<String>,
    pub genre_upstream_id: Option<String>,
}

impl ExtractedTrack {
    /// A record with nothing but identity and freshness; extractors fill in
    /// whatever the source actually provides.
    pub fn new(locator: Locator, modified_at: i64) -> Self {
        Self {
            locator,
            title: None,
            album_title: None,
            artist_name: None,
            genre_name: None,
            duration_ms: None,
            track_number: None,
            disc_number: None,
            modified_at,
            content_fingerprint: None,
            artwork_ref: None,
            album_upstream_id: None,
            artist_upstream_id: None,
            genre_upstream_id: None,
        }
    }
}

// =============================================================================
// Change events
// =============================================================================

/// What happened to a locator, as reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// A single raw change notification from a watcher, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    pub locator: Locator,
    pub kind: ChangeKind,
}

impl RawChangeEvent {
    pub fn new(locator: Locator, kind: ChangeKind) -> Self {
        Self { locator, kind }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Per-item extraction failure. Non-fatal: the engine records it and skips
/// the locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("source unreadable: {locator}: {message}")]
    UnreadableSource { locator: String, message: String },

    #[error("unsupported format: {locator}")]
    UnsupportedFormat { locator: String },

    #[error("corrupt metadata: {locator}: {message}")]
    CorruptMetadata { locator: String, message: String },
}

impl ExtractionError {
    /// Canonical key of the locator the failure refers to.
    pub fn locator(&self) -> &str {
        match self {
            Self::UnreadableSource { locator, .. }
            | Self::UnsupportedFormat { locator }
            | Self::CorruptMetadata { locator, .. } => locator,
        }
    }
}

/// Per-entry problem during enumeration. The traversal continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("enumeration warning: {message}")]
pub struct EnumerationWarning {
    /// Canonical locator key of the offending entry, when known.
    pub locator: Option<String>,
    pub message: String,
}

impl EnumerationWarning {
    pub fn new(locator: Option<String>, message: impl Into<String>) -> Self {
        Self {
            locator,
            message: message.into(),
        }
    }
}

/// Watcher-level failure. The engine surfaces it and restarts the watcher
/// with backoff rather than letting it die silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("watching is not supported by this source")]
    Unsupported,

    #[error("watcher initialization failed: {0}")]
    Initialization(String),

    #[error("watcher backend error: {0}")]
    Backend(String),
}

/// Run-fatal source failure: the whole scope could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source root unavailable: {0}")]
    RootUnavailable(String),

    #[error("scope not supported by this source: {0}")]
    UnsupportedScope(String),

    #[error("source backend error: {0}")]
    Backend(String),
}

// =============================================================================
// Streams
// =============================================================================

/// One element of an enumeration.
///
/// `Failed` is terminal: the traversal could not complete and the stream
/// ends after it. Consumers must treat such an enumeration as incomplete,
/// which above all means not inferring deletions from what it happened to
/// deliver before failing.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumerationEntry {
    /// A discovered item.
    Item(Locator),
    /// A skipped entry; the traversal continues.
    Warning(EnumerationWarning),
    /// The traversal died mid-way.
    Failed(SourceError),
}

/// Lazy, finite sequence of enumeration entries.
///
/// Backed by a bounded channel fed from the source's traversal task; the
/// stream ends when the traversal finishes and the sender side is dropped.
/// Dropping the stream early aborts the traversal through channel closure.
pub struct EnumerationStream {
    rx: mpsc::Receiver<EnumerationEntry>,
}

impl EnumerationStream {
    pub fn new(rx: mpsc::Receiver<EnumerationEntry>) -> Self {
        Self { rx }
    }

    /// Bounded channel pair sized for enumeration.
    pub fn channel() -> (mpsc::Sender<EnumerationEntry>, Self) {
        let (tx, rx) = mpsc::channel(ENUMERATION_CHANNEL_CAPACITY);
        (tx, Self::new(rx))
    }

    /// Next entry, or `None` once the traversal is complete.
    pub async fn next(&mut self) -> Option<EnumerationEntry> {
        self.rx.recv().await
    }
}

/// Unbounded-in-time feed of raw change events, active until stopped.
///
/// Dropping the stream also stops the underlying watcher.
pub struct ChangeStream {
    rx: mpsc::Receiver<RawChangeEvent>,
    stop: CancellationToken,
}

impl ChangeStream {
    /// Wrap a receiver together with the token the producing task honors.
    pub fn new(rx: mpsc::Receiver<RawChangeEvent>, stop: CancellationToken) -> Self {
        Self { rx, stop }
    }

    /// Next raw event, or `None` once the watcher has shut down.
    pub async fn next(&mut self) -> Option<RawChangeEvent> {
        self.rx.recv().await
    }

    /// Request the watcher to stop. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

// =============================================================================
// The capability trait
// =============================================================================

/// The three capabilities the sync engine needs from a source variant.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::{MediaSource, SyncScope, EnumerationEntry};
///
/// async fn count_items(source: &dyn MediaSource, scope: &SyncScope) -> usize {
///     let mut stream = source.enumerate(scope).await.unwrap();
///     let mut n = 0;
///     while let Some(entry) = stream.next().await {
///         if matches!(entry, EnumerationEntry::Item(_)) {
///             n += 1;
///         }
///     }
///     n
/// }
/// ```
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Configured identifier of this source.
    fn id(&self) -> &SourceId;

    /// Which variant this source is.
    fn kind(&self) -> SourceKind;

    /// Start a fresh traversal of the scope.
    ///
    /// Each call produces a new, complete traversal. Individual unreadable
    /// entries surface as [`EnumerationEntry::Warning`] without ending the
    /// stream; an unreadable root is a [`SourceError`]; a traversal that
    /// dies mid-way ends the stream with [`EnumerationEntry::Failed`].
    async fn enumerate(&self, scope: &SyncScope) -> Result<EnumerationStream, SourceError>;

    /// Extract metadata for one item.
    async fn extract(&self, locator: &Locator) -> Result<ExtractedTrack, ExtractionError>;

    /// Whether this source can deliver change notifications.
    fn supports_watch(&self) -> bool {
        false
    }

    /// Start watching the scope for changes.
    ///
    /// The default implementation reports [`WatchError::Unsupported`];
    /// sources that can watch override it.
    async fn watch(&self, scope: &SyncScope) -> Result<ChangeStream, WatchError> {
        let _ = scope;
        Err(WatchError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_key_round_trip() {
        let locators = vec![
            Locator::Path(PathBuf::from("/music/a.mp3")),
            Locator::Uri("content://media/external/audio/17".to_string()),
            Locator::Remote("track/abc123".to_string()),
        ];

        for locator in locators {
            let key = locator.as_key();
            let parsed = Locator::from_key(&key).unwrap();
            assert_eq!(parsed, locator);
        }
    }

    #[test]
    fn test_locator_key_is_stable() {
        let a = Locator::Path(PathBuf::from("/music/artist/song.flac"));
        let b = Locator::Path(PathBuf::from("/music/artist/song.flac"));
        assert_eq!(a.as_key(), b.as_key());
    }

    #[test]
    fn test_locator_from_key_rejects_unknown_prefix() {
        assert_eq!(Locator::from_key("ftp:/music/a.mp3"), None);
        assert_eq!(Locator::from_key("no-separator"), None);
    }

    #[test]
    fn test_locator_starts_with() {
        let root = Locator::Path(PathBuf::from("/music"));
        let inside = Locator::Path(PathBuf::from("/music/album/track.mp3"));
        let outside = Locator::Path(PathBuf::from("/videos/clip.mp4"));

        assert!(inside.starts_with(&root));
        assert!(!outside.starts_with(&root));
        // Component-wise, not raw string prefix
        let sibling = Locator::Path(PathBuf::from("/music2/track.mp3"));
        assert!(!sibling.starts_with(&root));
        // Kinds never mix
        let uri = Locator::Uri("content://media/1".to_string());
        assert!(!uri.starts_with(&root));
    }

    #[test]
    fn test_locator_stem() {
        let path = Locator::Path(PathBuf::from("/music/My Song.mp3"));
        assert_eq!(path.stem(), Some("My Song".to_string()));

        let remote = Locator::Remote("tracks/abc123".to_string());
        assert_eq!(remote.stem(), Some("abc123".to_string()));
    }

    #[test]
    fn test_content_kind_classification() {
        let audio = Locator::Path(PathBuf::from("/m/a.FLAC"));
        assert_eq!(ContentKind::from_locator(&audio), ContentKind::Audio);

        let video = Locator::Path(PathBuf::from("/m/b.mkv"));
        assert_eq!(ContentKind::from_locator(&video), ContentKind::Video);

        let image = Locator::Path(PathBuf::from("/m/cover.jpg"));
        assert_eq!(ContentKind::from_locator(&image), ContentKind::Image);

        let other = Locator::Path(PathBuf::from("/m/readme.txt"));
        assert_eq!(ContentKind::from_locator(&other), ContentKind::Other);

        // Extension-less URIs default to audio
        let uri = Locator::Uri("content://media/external/audio/17".to_string());
        assert_eq!(ContentKind::from_locator(&uri), ContentKind::Audio);
    }

    #[test]
    fn test_extraction_error_locator_accessor() {
        let err = ExtractionError::UnsupportedFormat {
            locator: "path:/m/a.xyz".to_string(),
        };
        assert_eq!(err.locator(), "path:/m/a.xyz");
    }

    #[tokio::test]
    async fn test_enumeration_stream_ends_when_sender_drops() {
        let (tx, mut stream) = EnumerationStream::channel();
        tx.send(EnumerationEntry::Item(Locator::Remote("a".into())))
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(
            stream.next().await,
            Some(EnumerationEntry::Item(_))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_change_stream_stop_cancels_token() {
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let stream = ChangeStream::new(rx, token.clone());

        assert!(!token.is_cancelled());
        stream.stop();
        assert!(token.is_cancelled());
        drop(tx);
    }

    #[tokio::test]
    async fn test_change_stream_drop_cancels_token() {
        let (_tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        {
            let _stream = ChangeStream::new(rx, token.clone());
        }
        assert!(token.is_cancelled());
    }
}
