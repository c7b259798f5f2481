//! Domain models for the library snapshot
//!
//! This module contains the persisted track and group records, the derived
//! identifiers that tie them together, and the change-set type through which
//! every mutation of the snapshot flows.

use bridge_traits::{ExtractedTrack, Locator, SourceId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use std::collections::HashSet;
use std::fmt;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a track.
///
/// Derived from the locator's canonical key, so the same unchanged item
/// keeps the same id across rescans, restarts and re-imports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Derive the id for a locator.
    pub fn from_locator(locator: &Locator) -> Self {
        Self(hex_sha256(locator.as_key().as_bytes()))
    }

    /// Wrap an id read back from storage.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a derived group (album, artist, genre).
///
/// Derived from the group's kind, its case-folded key and the upstream id
/// it rode in on (empty when there is none), so identical inputs always
/// produce the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Derive the id for a group bucket.
    pub fn derive(kind: GroupKind, normalized_key: &str, upstream_id: Option<&str>) -> Self {
        let input = format!(
            "{}:{}:{}",
            kind.as_str(),
            normalized_key,
            upstream_id.unwrap_or("")
        );
        Self(hex_sha256(input.as_bytes()))
    }

    /// Wrap an id read back from storage.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a display name into a grouping key: trimmed, case-folded, with
/// runs of whitespace collapsed. "The Beatles " and "the beatles" land in
/// the same bucket; the display name keeps its original casing.
pub fn normalize_group_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Track records
// =============================================================================

/// Fallback title when a track carries no usable title and its locator has
/// no recognizable stem.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// A track as persisted in the library snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TrackRecord {
    /// Derived identifier, stable for the locator
    pub id: TrackId,
    /// Source this track belongs to
    pub source_id: String,
    /// Canonical locator key
    pub locator: String,

    // Metadata
    /// Track title; never empty (falls back to the file stem)
    pub title: String,
    /// Album name as extracted, before grouping
    pub album_title: Option<String>,
    /// Artist name as extracted, before grouping
    pub artist_name: Option<String>,
    /// Genre name as extracted, before grouping
    pub genre_name: Option<String>,
    /// Duration in milliseconds; absent is `None`, never 0
    pub duration_ms: Option<i64>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,

    // Freshness
    /// Source-side last-modified time, unix milliseconds
    pub modified_at: i64,
    /// Hex SHA-256 of the content bytes, when computed
    pub content_fingerprint: Option<String>,

    // Artwork
    /// Sidecar path, embedded marker, or artwork URL
    pub artwork_ref: Option<String>,

    // Upstream grouping identity, when the source is authoritative
    pub album_upstream_id: Option<String>,
    pub artist_upstream_id: Option<String>,
    pub genre_upstream_id: Option<String>,

    // Resolved group membership, assigned during reconciliation
    pub album_id: Option<GroupId>,
    pub artist_id: Option<GroupId>,
    pub genre_id: Option<GroupId>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl TrackRecord {
    /// Build a record from extraction output.
    ///
    /// The title falls back to the locator's file stem, then to
    /// [`UNKNOWN_TITLE`], so the column is never empty. Group memberships
    /// start unassigned; reconciliation fills them in.
    pub fn from_extracted(source_id: &SourceId, extracted: &ExtractedTrack, now: i64) -> Self {
        let title = extracted
            .title
            .clone()
            .or_else(|| extracted.locator.stem())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        Self {
            id: TrackId::from_locator(&extracted.locator),
            source_id: source_id.as_str().to_string(),
            locator: extracted.locator.as_key(),
            title,
            album_title: extracted.album_title.clone(),
            artist_name: extracted.artist_name.clone(),
            genre_name: extracted.genre_name.clone(),
            duration_ms: extracted.duration_ms,
            track_number: extracted.track_number,
            disc_number: extracted.disc_number,
            modified_at: extracted.modified_at,
            content_fingerprint: extracted.content_fingerprint.clone(),
            artwork_ref: extracted.artwork_ref.clone(),
            album_upstream_id: extracted.album_upstream_id.clone(),
            artist_upstream_id: extracted.artist_upstream_id.clone(),
            genre_upstream_id: extracted.genre_upstream_id.clone(),
            album_id: None,
            artist_id: None,
            genre_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The locator this record was built from.
    pub fn locator(&self) -> Option<Locator> {
        Locator::from_key(&self.locator)
    }

    /// Whether stored metadata is stale relative to a fresh extraction.
    ///
    /// When both sides carry a content fingerprint it decides alone: equal
    /// fingerprints mean the bytes did not change, whatever the timestamps
    /// say. Otherwise the modification time decides.
    pub fn is_stale_against(&self, fresh: &TrackRecord) -> bool {
        match (&self.content_fingerprint, &fresh.content_fingerprint) {
            (Some(ours), Some(theirs)) => ours != theirs,
            _ => self.modified_at != fresh.modified_at,
        }
    }
}

/// The cheap per-track projection reconciliation diffs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TrackFingerprint {
    pub id: TrackId,
    pub locator: String,
    pub modified_at: i64,
    pub content_fingerprint: Option<String>,
}

impl TrackFingerprint {
    /// Whether a freshly observed (modified_at, fingerprint) pair differs
    /// from this stored one. Fingerprints decide alone when both are known.
    pub fn differs_from(&self, modified_at: i64, content_fingerprint: Option<&str>) -> bool {
        match (&self.content_fingerprint, content_fingerprint) {
            (Some(ours), Some(theirs)) => ours.as_str() != theirs,
            _ => self.modified_at != modified_at,
        }
    }
}

// =============================================================================
// Group records
// =============================================================================

/// Which axis a derived group collects tracks along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum GroupKind {
    Album,
    Artist,
    Genre,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Genre => "genre",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A derived group (album, artist or genre) as persisted.
///
/// Groups are entirely derived from the track set: `track_count` is always
/// recomputed, never incremented, and a group whose last member disappears
/// is deleted rather than left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GroupRecord {
    pub id: GroupId,
    pub kind: GroupKind,
    /// Display name, original casing preserved
    pub name: String,
    /// Case-folded grouping key the id was derived from
    pub sort_key: String,
    /// Source-authoritative group identity, when one exists
    pub upstream_id: Option<String>,
    /// Recomputed member count
    pub track_count: i64,
    /// Representative artwork borrowed from a member track
    pub artwork_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// Change sets
// =============================================================================

/// The complete, validated outcome of a reconciliation, applied to the
/// snapshot as one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub inserts: Vec<TrackRecord>,
    pub updates: Vec<TrackRecord>,
    pub deletes: Vec<TrackId>,
    pub group_upserts: Vec<GroupRecord>,
    pub group_deletes: Vec<GroupId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.group_upserts.is_empty()
            && self.group_deletes.is_empty()
    }

    /// Total number of track mutations (groups not counted).
    pub fn track_change_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Check the structural invariants of the change set.
    ///
    /// The insert, update and delete id sets must be pairwise disjoint: a
    /// track cannot be both updated and deleted by the same reconciliation.
    /// The same holds for group upserts versus group deletes.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&TrackId> = HashSet::new();

        for record in self.inserts.iter().chain(self.updates.iter()) {
            if !seen.insert(&record.id) {
                return Err(overlap_error("tracks", record.id.as_str()));
            }
        }
        for id in &self.deletes {
            if !seen.insert(id) {
                return Err(overlap_error("tracks", id.as_str()));
            }
        }

        let mut group_seen: HashSet<&GroupId> = HashSet::new();
        for group in &self.group_upserts {
            if !group_seen.insert(&group.id) {
                return Err(overlap_error("groups", group.id.as_str()));
            }
        }
        for id in &self.group_deletes {
            if !group_seen.insert(id) {
                return Err(overlap_error("groups", id.as_str()));
            }
        }

        Ok(())
    }
}

fn overlap_error(what: &str, id: &str) -> LibraryError {
    LibraryError::InvalidInput {
        field: what.to_string(),
        message: format!("id {} appears in more than one change bucket", id),
    }
}
