//! # Library Snapshot Module
//!
//! Owns the persisted library database: the track snapshot, the derived
//! groups over it, and the transactional surface through which sync runs
//! mutate both.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Derived track and group identity
//! - Change-set validation and all-or-nothing application

pub mod db;
pub mod error;
pub mod models;
pub mod snapshot;

pub use db::{create_pool, create_test_pool, health_check, DatabaseConfig};
pub use error::{LibraryError, PersistError, Result};
pub use models::{
    normalize_group_key, now_ms, ChangeSet, GroupId, GroupKind, GroupRecord, TrackFingerprint,
    TrackId, TrackRecord, UNKNOWN_TITLE,
};
pub use snapshot::{SnapshotScope, SnapshotStore, SqliteSnapshotStore};
