//! # Medley
//!
//! A media library synchronization engine: sources in, convergent library
//! snapshot out.
//!
//! ## Overview
//!
//! The engine discovers audio items from configured sources, extracts their
//! metadata, reconciles the result against the persisted snapshot, and
//! applies a minimal transactional change set, while reporting progress over
//! a watch channel and supporting cancellation, supersession, and debounced
//! filesystem watching.
//!
//! This crate is the assembly point: [`build_engine`] turns a validated
//! [`EngineConfig`] into a ready [`SyncOrchestrator`], constructing the
//! snapshot store and one provider per configured source. Provider crates
//! are feature-gated so hosts compile only the source kinds they ship:
//!
//! | Feature | Source variant | Provider |
//! |---|---|---|
//! | `local-source` (default) | `LocalFilesystem` | walkdir + lofty + notify |
//! | `index-source` | `ContentIndex` | host-supplied `MediaIndex` |
//! | `catalog-source` | `RemoteCatalog` | paged HTTP catalog via reqwest |
//!
//! ## Usage
//!
//! ```ignore
//! use medley_workspace::{build_engine, EngineConfig, SourceDefinition, SourceId, SyncScope};
//!
//! let config = EngineConfig::builder()
//!     .database_path("/data/library.db")
//!     .source(SourceDefinition::local_filesystem("laptop", "/music"))
//!     .build()?;
//!
//! let engine = build_engine(config).await?;
//! let mut status = engine.subscribe();
//! engine.start_sync(SyncScope::full(SourceId::new("laptop"))).await?;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

pub use bridge_traits::{
    ChangeKind, ContentKind, HttpClient, Locator, MediaIndex, MediaSource, RawChangeEvent,
    ScopeKind, SourceId, SourceKind, SyncScope,
};
pub use core_library::{
    create_pool, ChangeSet, DatabaseConfig, GroupKind, GroupRecord, PersistError, SnapshotScope,
    SnapshotStore, SqliteSnapshotStore, TrackId, TrackRecord,
};
pub use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use core_runtime::{EngineConfig, EngineConfigBuilder, SourceDefinition, SourceVariantConfig};
pub use core_sync::{
    RunStats, SyncError, SyncOrchestrator, SyncProgress, SyncRunId, SyncSettings, SyncState,
    SyncStateReporter, SyncStatus,
};

#[cfg(feature = "local-source")]
pub use provider_local::LocalFilesystemSource;

#[cfg(feature = "index-source")]
pub use provider_index::PlatformIndexSource;

#[cfg(feature = "catalog-source")]
pub use provider_catalog::{CatalogConnector, RemoteCatalogSource, ReqwestHttpClient};

/// Errors surfaced while assembling the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration was rejected.
    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    /// The library database could not be opened or migrated.
    #[error(transparent)]
    Library(#[from] core_library::LibraryError),

    /// The built-in HTTP client could not be constructed.
    #[error(transparent)]
    Http(#[from] bridge_traits::BridgeError),

    /// A source variant was configured whose provider is compiled out.
    #[error(
        "Source '{id}' requires the '{feature}' feature, which is not enabled. \
         Enable it in Cargo.toml or remove the source."
    )]
    FeatureDisabled { id: String, feature: &'static str },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Assemble a ready-to-run engine from a validated configuration.
///
/// Opens (and migrates) the library database, constructs one provider per
/// configured source, and registers everything with a fresh
/// [`SyncOrchestrator`]. The returned orchestrator is idle; nothing syncs
/// until [`SyncOrchestrator::start_sync`] is called.
///
/// # Errors
///
/// Fails when the configuration is invalid, the database cannot be opened
/// or migrated, or a configured source variant's provider feature is
/// compiled out.
pub async fn build_engine(config: EngineConfig) -> Result<Arc<SyncOrchestrator>> {
    config.validate()?;

    let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(pool));

    let settings = SyncSettings {
        max_concurrent_extractions: config.max_concurrent_extractions,
        extraction_timeout: config.extraction_timeout,
        debounce_window: config.debounce_window,
        max_pending_changes: config.max_pending_changes,
        persist_retry_attempts: config.persist_retry_attempts,
        persist_retry_base_delay: config.persist_retry_base_delay,
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(settings, store));
    for definition in &config.sources {
        let source = build_source(&config, definition)?;
        orchestrator.register_source(source).await;
    }

    info!(sources = config.sources.len(), "engine assembled");
    Ok(orchestrator)
}

/// Construct the provider backing one source definition.
fn build_source(
    config: &EngineConfig,
    definition: &SourceDefinition,
) -> Result<Arc<dyn MediaSource>> {
    match &definition.variant {
        #[cfg(feature = "local-source")]
        SourceVariantConfig::LocalFilesystem { root, extensions } => {
            let mut source = LocalFilesystemSource::new(definition.id.clone(), root.clone())
                .fingerprinting(config.compute_content_fingerprints);
            if let Some(extensions) = extensions {
                source = source.with_extensions(extensions.clone());
            }
            Ok(Arc::new(source))
        }
        #[cfg(not(feature = "local-source"))]
        SourceVariantConfig::LocalFilesystem { .. } => Err(EngineError::FeatureDisabled {
            id: definition.id.to_string(),
            feature: "local-source",
        }),

        #[cfg(feature = "index-source")]
        SourceVariantConfig::ContentIndex { page_size } => {
            let index = config.media_index.clone().ok_or_else(|| {
                core_runtime::Error::Config(format!(
                    "Source '{}': ContentIndex requires a MediaIndex handle",
                    definition.id
                ))
            })?;
            Ok(Arc::new(
                PlatformIndexSource::new(definition.id.clone(), index).with_page_size(*page_size),
            ))
        }
        #[cfg(not(feature = "index-source"))]
        SourceVariantConfig::ContentIndex { .. } => Err(EngineError::FeatureDisabled {
            id: definition.id.to_string(),
            feature: "index-source",
        }),

        #[cfg(feature = "catalog-source")]
        SourceVariantConfig::RemoteCatalog {
            base_url,
            auth_token,
            page_size,
        } => {
            let http: Arc<dyn HttpClient> = match &config.http_client {
                Some(client) => Arc::clone(client),
                None => Arc::new(ReqwestHttpClient::new()?),
            };
            let mut connector =
                CatalogConnector::new(http, base_url.clone()).with_page_size(*page_size);
            if let Some(token) = auth_token {
                connector = connector.with_access_token(token.clone());
            }
            Ok(Arc::new(RemoteCatalogSource::new(
                definition.id.clone(),
                connector,
            )))
        }
        #[cfg(not(feature = "catalog-source"))]
        SourceVariantConfig::RemoteCatalog { .. } => Err(EngineError::FeatureDisabled {
            id: definition.id.to_string(),
            feature: "catalog-source",
        }),
    }
}
