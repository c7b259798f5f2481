//! # Engine Configuration Module
//!
//! Configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! [`EngineConfig`] instance holding the database location, the set of
//! configured sources and the tuning knobs of a sync run. It enforces
//! fail-fast validation: a config that would misbehave at runtime (no
//! sources, overlapping roots, an index source without an index handle)
//! is rejected at build time with an actionable message.
//!
//! ## Capability Injection
//!
//! Source variants that depend on host capabilities receive them here:
//!
//! - `ContentIndex` sources require a [`MediaIndex`] handle via
//!   [`EngineConfigBuilder::media_index`]
//! - `RemoteCatalog` sources accept an optional [`HttpClient`] override
//!   via [`EngineConfigBuilder::http_client`]; without one the catalog
//!   provider constructs its own
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{EngineConfig, SourceDefinition};
//!
//! let config = EngineConfig::builder()
//!     .database_path("/data/library.db")
//!     .source(SourceDefinition::local_filesystem("laptop", "/music"))
//!     .max_concurrent_extractions(8)
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, MediaIndex, SourceId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of concurrent metadata extractions.
pub const DEFAULT_MAX_CONCURRENT_EXTRACTIONS: usize = 4;

/// Default per-item extraction timeout.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default quiet window before a burst of change events is flushed.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Default cap on buffered change events before a forced flush.
pub const DEFAULT_MAX_PENDING_CHANGES: usize = 4096;

/// Default number of attempts for a failing snapshot commit.
pub const DEFAULT_PERSIST_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay between persist retries.
pub const DEFAULT_PERSIST_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default page size for paged sources (catalog, platform index).
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// How one configured source is backed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceVariantConfig {
    /// Walk a directory tree and parse tags out of the files themselves.
    LocalFilesystem {
        /// Absolute root of the tree to enumerate.
        root: PathBuf,
        /// File extensions to include; `None` means the built-in audio set.
        extensions: Option<Vec<String>>,
    },
    /// Read pre-parsed entries from a host-provided platform media index.
    ContentIndex {
        /// Entries fetched per page.
        page_size: usize,
    },
    /// Page through a remote catalog's HTTP API.
    RemoteCatalog {
        /// Base URL of the catalog, e.g. `https://catalog.example.com`.
        base_url: String,
        /// Bearer token sent with every request, when the catalog needs one.
        auth_token: Option<String>,
        /// Descriptors fetched per page.
        page_size: usize,
    },
}

/// One configured source: a stable identifier plus its backing variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub id: SourceId,
    pub variant: SourceVariantConfig,
}

impl SourceDefinition {
    pub fn new(id: impl Into<String>, variant: SourceVariantConfig) -> Self {
        Self {
            id: SourceId::new(id),
            variant,
        }
    }

    /// A local filesystem source over `root` with the default audio
    /// extension set.
    pub fn local_filesystem(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::new(
            id,
            SourceVariantConfig::LocalFilesystem {
                root: root.into(),
                extensions: None,
            },
        )
    }

    /// A platform content-index source with the default page size.
    pub fn content_index(id: impl Into<String>) -> Self {
        Self::new(
            id,
            SourceVariantConfig::ContentIndex {
                page_size: DEFAULT_PAGE_SIZE,
            },
        )
    }

    /// A remote catalog source with the default page size and no auth.
    pub fn remote_catalog(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::new(
            id,
            SourceVariantConfig::RemoteCatalog {
                base_url: base_url.into(),
                auth_token: None,
                page_size: DEFAULT_PAGE_SIZE,
            },
        )
    }

    fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::Config("Source id cannot be empty".to_string()));
        }

        match &self.variant {
            SourceVariantConfig::LocalFilesystem { root, extensions } => {
                if root.as_os_str().is_empty() {
                    return Err(Error::Config(format!(
                        "Source '{}': root path cannot be empty",
                        self.id
                    )));
                }
                if !root.is_absolute() {
                    return Err(Error::Config(format!(
                        "Source '{}': root must be an absolute path, got '{}'",
                        self.id,
                        root.display()
                    )));
                }
                if let Some(exts) = extensions {
                    if exts.is_empty() {
                        return Err(Error::Config(format!(
                            "Source '{}': extension filter cannot be an empty list. \
                             Omit it to use the default audio extensions.",
                            self.id
                        )));
                    }
                }
            }
            SourceVariantConfig::ContentIndex { page_size } => {
                validate_page_size(&self.id, *page_size)?;
            }
            SourceVariantConfig::RemoteCatalog {
                base_url,
                page_size,
                ..
            } => {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    return Err(Error::Config(format!(
                        "Source '{}': base URL must start with http:// or https://, got '{}'",
                        self.id, base_url
                    )));
                }
                validate_page_size(&self.id, *page_size)?;
            }
        }

        Ok(())
    }
}

fn validate_page_size(id: &SourceId, page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(Error::Config(format!(
            "Source '{}': page size must be greater than 0",
            id
        )));
    }
    if page_size > 1000 {
        return Err(Error::Config(format!(
            "Source '{}': page size exceeds maximum of 1000",
            id
        )));
    }
    Ok(())
}

/// Engine configuration.
///
/// Holds everything needed to assemble the sync engine. Use
/// [`EngineConfigBuilder`] to construct instances; direct construction is
/// deliberately not offered so that validation cannot be skipped.
#[derive(Clone)]
pub struct EngineConfig {
    /// Path to the SQLite library database.
    pub database_path: PathBuf,

    /// The configured sources, in declaration order.
    pub sources: Vec<SourceDefinition>,

    /// Upper bound on metadata extractions running at once.
    pub max_concurrent_extractions: usize,

    /// Per-item extraction timeout. An item exceeding it is recorded as
    /// failed and the run continues.
    pub extraction_timeout: Duration,

    /// Quiet window a burst of change events must stay silent for before
    /// it is flushed into an incremental sync.
    pub debounce_window: Duration,

    /// Buffered change events that force a flush even without quiet.
    pub max_pending_changes: usize,

    /// Attempts for a failing snapshot commit before the run fails.
    pub persist_retry_attempts: u32,

    /// Base delay between persist retries; doubles each attempt.
    pub persist_retry_base_delay: Duration,

    /// Whether local files get a content hash next to their tag data.
    pub compute_content_fingerprints: bool,

    /// Host-provided platform index, required by `ContentIndex` sources.
    pub media_index: Option<Arc<dyn MediaIndex>>,

    /// HTTP client override for `RemoteCatalog` sources.
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("database_path", &self.database_path)
            .field("sources", &self.sources)
            .field("max_concurrent_extractions", &self.max_concurrent_extractions)
            .field("extraction_timeout", &self.extraction_timeout)
            .field("debounce_window", &self.debounce_window)
            .field("max_pending_changes", &self.max_pending_changes)
            .field("persist_retry_attempts", &self.persist_retry_attempts)
            .field("persist_retry_base_delay", &self.persist_retry_base_delay)
            .field(
                "compute_content_fingerprints",
                &self.compute_content_fingerprints,
            )
            .field(
                "media_index",
                &self.media_index.as_ref().map(|_| "MediaIndex { ... }"),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .finish()
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - At least one source is configured
    /// - Source ids are unique and every variant is self-consistent
    /// - Local filesystem roots do not nest inside each other
    /// - Index sources have a `MediaIndex` handle to talk to
    /// - Tuning knobs are within sane bounds
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.sources.is_empty() {
            return Err(Error::Config(
                "At least one source must be configured. Use .source() to add one.".to_string(),
            ));
        }

        for source in &self.sources {
            source.validate()?;
        }

        // Duplicate ids would make scope filters ambiguous
        for (i, a) in self.sources.iter().enumerate() {
            for b in self.sources.iter().skip(i + 1) {
                if a.id == b.id {
                    return Err(Error::Config(format!(
                        "Duplicate source id '{}'. Source ids must be unique.",
                        a.id
                    )));
                }
            }
        }

        // Nested roots would import the inner tree twice under two ids
        let roots: Vec<(&SourceId, &PathBuf)> = self
            .sources
            .iter()
            .filter_map(|s| match &s.variant {
                SourceVariantConfig::LocalFilesystem { root, .. } => Some((&s.id, root)),
                _ => None,
            })
            .collect();
        for (i, (id_a, root_a)) in roots.iter().enumerate() {
            for (id_b, root_b) in roots.iter().skip(i + 1) {
                if root_a.starts_with(root_b) || root_b.starts_with(root_a) {
                    return Err(Error::Config(format!(
                        "Sources '{}' and '{}' have overlapping roots ('{}' and '{}'). \
                         Each file must belong to exactly one source.",
                        id_a,
                        id_b,
                        root_a.display(),
                        root_b.display()
                    )));
                }
            }
        }

        let wants_index = self
            .sources
            .iter()
            .any(|s| matches!(s.variant, SourceVariantConfig::ContentIndex { .. }));
        if wants_index && self.media_index.is_none() {
            return Err(Error::Config(
                "A ContentIndex source is configured but no MediaIndex was provided. \
                 Inject one with .media_index() or remove the source."
                    .to_string(),
            ));
        }

        if self.max_concurrent_extractions == 0 {
            return Err(Error::Config(
                "max_concurrent_extractions must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_extractions > 64 {
            return Err(Error::Config(
                "max_concurrent_extractions exceeds maximum of 64".to_string(),
            ));
        }

        if self.extraction_timeout.is_zero() {
            return Err(Error::Config(
                "extraction_timeout must be greater than zero".to_string(),
            ));
        }

        if self.debounce_window.is_zero() {
            return Err(Error::Config(
                "debounce_window must be greater than zero".to_string(),
            ));
        }
        if self.debounce_window > Duration::from_secs(60) {
            return Err(Error::Config(
                "debounce_window exceeds maximum of 60 seconds".to_string(),
            ));
        }

        if self.max_pending_changes == 0 {
            return Err(Error::Config(
                "max_pending_changes must be greater than 0".to_string(),
            ));
        }

        if self.persist_retry_attempts == 0 {
            return Err(Error::Config(
                "persist_retry_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The definition for `id`, if configured.
    pub fn source(&self, id: &SourceId) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| &s.id == id)
    }
}

/// Builder for constructing [`EngineConfig`] instances.
#[derive(Default)]
pub struct EngineConfigBuilder {
    database_path: Option<PathBuf>,
    sources: Vec<SourceDefinition>,
    max_concurrent_extractions: Option<usize>,
    extraction_timeout: Option<Duration>,
    debounce_window: Option<Duration>,
    max_pending_changes: Option<usize>,
    persist_retry_attempts: Option<u32>,
    persist_retry_base_delay: Option<Duration>,
    compute_content_fingerprints: Option<bool>,
    media_index: Option<Arc<dyn MediaIndex>>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl EngineConfigBuilder {
    /// Sets the library database path.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Adds a source. Call once per configured source.
    pub fn source(mut self, definition: SourceDefinition) -> Self {
        self.sources.push(definition);
        self
    }

    /// Sets the extraction concurrency bound.
    ///
    /// Default: 4
    pub fn max_concurrent_extractions(mut self, limit: usize) -> Self {
        self.max_concurrent_extractions = Some(limit);
        self
    }

    /// Sets the per-item extraction timeout.
    ///
    /// Default: 30 seconds
    pub fn extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    /// Sets the change-event quiet window.
    ///
    /// Default: 500 milliseconds
    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = Some(window);
        self
    }

    /// Sets the buffered-change cap that forces a flush.
    ///
    /// Default: 4096
    pub fn max_pending_changes(mut self, cap: usize) -> Self {
        self.max_pending_changes = Some(cap);
        self
    }

    /// Sets the number of snapshot-commit attempts.
    ///
    /// Default: 3
    pub fn persist_retry_attempts(mut self, attempts: u32) -> Self {
        self.persist_retry_attempts = Some(attempts);
        self
    }

    /// Sets the base delay between persist retries.
    ///
    /// Default: 100 milliseconds
    pub fn persist_retry_base_delay(mut self, delay: Duration) -> Self {
        self.persist_retry_base_delay = Some(delay);
        self
    }

    /// Enables or disables content hashing for local files.
    ///
    /// Default: true
    pub fn compute_content_fingerprints(mut self, enabled: bool) -> Self {
        self.compute_content_fingerprints = Some(enabled);
        self
    }

    /// Sets the platform index handle, required by `ContentIndex` sources.
    ///
    /// # Arguments
    ///
    /// * `index` - Host-implemented platform media index
    pub fn media_index(mut self, index: Arc<dyn MediaIndex>) -> Self {
        self.media_index = Some(index);
        self
    }

    /// Sets an HTTP client override for `RemoteCatalog` sources.
    ///
    /// Without one, the catalog provider constructs its own client.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the final `EngineConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(EngineConfig)` on success, or an error if:
    /// - The database path or source list is missing
    /// - A source definition is invalid
    /// - A source variant lacks its required capability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use core_runtime::config::{EngineConfig, SourceDefinition};
    /// let config = EngineConfig::builder()
    ///     .database_path("/data/library.db")
    ///     .source(SourceDefinition::local_filesystem("laptop", "/music"))
    ///     .build()?;
    /// # Ok::<(), core_runtime::Error>(())
    /// ```
    pub fn build(self) -> Result<EngineConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let config = EngineConfig {
            database_path,
            sources: self.sources,
            max_concurrent_extractions: self
                .max_concurrent_extractions
                .unwrap_or(DEFAULT_MAX_CONCURRENT_EXTRACTIONS),
            extraction_timeout: self.extraction_timeout.unwrap_or(DEFAULT_EXTRACTION_TIMEOUT),
            debounce_window: self.debounce_window.unwrap_or(DEFAULT_DEBOUNCE_WINDOW),
            max_pending_changes: self
                .max_pending_changes
                .unwrap_or(DEFAULT_MAX_PENDING_CHANGES),
            persist_retry_attempts: self
                .persist_retry_attempts
                .unwrap_or(DEFAULT_PERSIST_RETRY_ATTEMPTS),
            persist_retry_base_delay: self
                .persist_retry_base_delay
                .unwrap_or(DEFAULT_PERSIST_RETRY_BASE_DELAY),
            compute_content_fingerprints: self.compute_content_fingerprints.unwrap_or(true),
            media_index: self.media_index,
            http_client: self.http_client,
        };

        config.validate()?;

        Ok(config)
    }
}
