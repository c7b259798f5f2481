//! Remote catalog API response types
//!
//! Data structures for deserializing catalog descriptor responses.

use serde::{Deserialize, Serialize};

/// Catalog track descriptor
///
/// Everything the catalog knows about one track. Only `id` is guaranteed;
/// the rest is whatever the catalog's own ingestion filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTrack {
    /// Stable track identifier within the catalog
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    /// Catalog-assigned album identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    /// Catalog-assigned artist identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<i64>,

    /// Last modification time (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Content checksum, when the catalog computes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Artwork URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// Catalog track listing response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksListResponse {
    /// Tracks on this page
    pub tracks: Vec<CatalogTrack>,

    /// Token for the next page; absent on the last page
    #[serde(default)]
    pub next_page_token: Option<String>,
}
