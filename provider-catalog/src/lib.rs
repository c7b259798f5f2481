//! # Remote Catalog Provider
//!
//! [`bridge_traits::MediaSource`] implementation for a remote track
//! catalog exposed over a paged JSON API.
//!
//! ## Overview
//!
//! The catalog is a read-only descriptor service: it owns the canonical
//! metadata and this provider merely mirrors it. There is nothing to parse
//! from content bytes, so extraction is descriptor conversion, and there
//! is no change feed, so the catalog is refreshed by full re-enumeration.
//!
//! The crate splits into:
//!
//! - [`connector`] - the API client, with retry on throttling and server
//!   errors
//! - [`source`] - the [`MediaSource`] adapter and descriptor conversion
//! - [`http`] - a reqwest-backed [`bridge_traits::HttpClient`] for hosts
//!   that do not inject their own
//! - [`types`] - wire-format DTOs
//! - [`error`] - catalog error types

pub mod connector;
pub mod error;
pub mod http;
pub mod source;
pub mod types;

pub use connector::CatalogConnector;
pub use error::{CatalogError, Result};
pub use http::ReqwestHttpClient;
pub use source::RemoteCatalogSource;
pub use types::CatalogTrack;
