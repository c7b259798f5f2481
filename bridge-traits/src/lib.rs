//! # Bridge Traits
//!
//! Capability contracts between the sync engine and whatever hosts it.
//!
//! ## Overview
//!
//! The engine core is platform-agnostic: it never opens a platform media
//! index, never constructs an HTTP client, never assumes a filesystem. All
//! of those capabilities arrive as trait objects defined here and are
//! implemented by provider crates or by the embedding application:
//!
//! - [`source::MediaSource`] - enumerate / extract / watch for one
//!   configured source
//! - [`index::MediaIndex`] - host-provided access to a platform content
//!   index
//! - [`http::HttpClient`] - HTTP execution for the remote catalog
//!
//! ## Design Principles
//!
//! - **Traits over conditionals**: the engine holds `Arc<dyn Trait>` and
//!   never branches on the concrete source variant
//! - **Async-first**: all capability methods that can block are `async`
//! - **Errors carry context**: every error string names the thing that
//!   failed, not just the failure class

pub mod error;
pub mod http;
pub mod index;
pub mod source;

pub use error::{BridgeError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use index::{IndexChange, IndexEntry, IndexPage, MediaIndex};
pub use source::{
    ChangeKind, ChangeStream, ContentKind, EnumerationEntry, EnumerationStream,
    EnumerationWarning, ExtractedTrack, ExtractionError, Locator, MediaSource, RawChangeEvent,
    ScopeKind, SourceError, SourceId, SourceKind, SyncScope, WatchError, CHANGE_CHANNEL_CAPACITY,
};
