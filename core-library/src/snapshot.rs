//! # Library Snapshot Store
//!
//! Read and mutate the persisted view of the library.
//!
//! ## Overview
//!
//! The snapshot store is the only way track and group rows change. Reads
//! hand reconciliation the current state (cheap fingerprint projections or
//! full records); [`SnapshotStore::apply`] commits a validated [`ChangeSet`]
//! in one transaction. Either every mutation in the set lands or none do.
//!
//! ## Concurrency
//!
//! Applies are serialized through an internal async mutex: two overlapping
//! change sets never interleave inside the database. A change set that no
//! longer matches the snapshot (updating a row that was deleted underneath
//! it) is rejected with [`PersistError::Conflict`] and rolled back whole.

use crate::error::PersistError;
use crate::models::{ChangeSet, GroupRecord, TrackFingerprint, TrackRecord};
use async_trait::async_trait;
use bridge_traits::SourceId;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Which slice of the snapshot a read covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotScope {
    /// Limit to one source; `None` reads the whole library.
    pub source_id: Option<SourceId>,
}

impl SnapshotScope {
    pub fn all() -> Self {
        Self { source_id: None }
    }

    pub fn source(source_id: SourceId) -> Self {
        Self {
            source_id: Some(source_id),
        }
    }
}

/// Persistence surface of the library snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the (id, locator, freshness) projection reconciliation diffs
    /// against. Ordered by locator for determinism.
    async fn read_fingerprints(
        &self,
        scope: &SnapshotScope,
    ) -> Result<Vec<TrackFingerprint>, PersistError>;

    /// Read full track records in scope.
    async fn read_tracks(&self, scope: &SnapshotScope) -> Result<Vec<TrackRecord>, PersistError>;

    /// Read all derived groups.
    async fn read_groups(&self) -> Result<Vec<GroupRecord>, PersistError>;

    /// Apply a change set as a single all-or-nothing transaction.
    ///
    /// Overlapping applies are serialized; a set that no longer matches
    /// the snapshot fails with [`PersistError::Conflict`] and leaves the
    /// database untouched.
    async fn apply(&self, changes: &ChangeSet) -> Result<(), PersistError>;
}

/// SQLite-backed snapshot store.
pub struct SqliteSnapshotStore {
    pool: Pool<Sqlite>,
    write_lock: Mutex<()>,
}

impl SqliteSnapshotStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn read_fingerprints(
        &self,
        scope: &SnapshotScope,
    ) -> Result<Vec<TrackFingerprint>, PersistError> {
        let rows = match &scope.source_id {
            Some(source_id) => {
                sqlx::query_as::<_, TrackFingerprint>(
                    "SELECT id, locator, modified_at, content_fingerprint \
                     FROM tracks WHERE source_id = ? ORDER BY locator",
                )
                .bind(source_id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TrackFingerprint>(
                    "SELECT id, locator, modified_at, content_fingerprint \
                     FROM tracks ORDER BY locator",
                )
                .fetch_all(&self.pool)
                .await
            }
        };

        rows.map_err(classify)
    }

    async fn read_tracks(&self, scope: &SnapshotScope) -> Result<Vec<TrackRecord>, PersistError> {
        let rows = match &scope.source_id {
            Some(source_id) => {
                sqlx::query_as::<_, TrackRecord>(
                    "SELECT * FROM tracks WHERE source_id = ? ORDER BY locator",
                )
                .bind(source_id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TrackRecord>("SELECT * FROM tracks ORDER BY locator")
                    .fetch_all(&self.pool)
                    .await
            }
        };

        rows.map_err(classify)
    }

    async fn read_groups(&self) -> Result<Vec<GroupRecord>, PersistError> {
        sqlx::query_as::<_, GroupRecord>("SELECT * FROM media_groups ORDER BY kind, sort_key")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    #[instrument(skip(self, changes), fields(
        inserts = changes.inserts.len(),
        updates = changes.updates.len(),
        deletes = changes.deletes.len(),
        group_upserts = changes.group_upserts.len(),
        group_deletes = changes.group_deletes.len(),
    ))]
    async fn apply(&self, changes: &ChangeSet) -> Result<(), PersistError> {
        changes
            .validate()
            .map_err(|e| PersistError::Conflict(e.to_string()))?;

        if changes.is_empty() {
            debug!("Empty change set, nothing to apply");
            return Ok(());
        }

        // One writer at a time; overlapping applies queue here
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Groups first so member rows never point at a missing group,
        // group deletions last for the mirror-image reason.
        for group in &changes.group_upserts {
            upsert_group(&mut tx, group).await?;
        }

        for record in &changes.inserts {
            insert_track(&mut tx, record).await?;
        }

        for record in &changes.updates {
            let result = update_track(&mut tx, record).await?;
            if result.rows_affected() == 0 {
                warn!(track_id = %record.id, "Update target vanished, rolling back");
                return Err(PersistError::Conflict(format!(
                    "track {} changed underneath this apply",
                    record.id
                )));
            }
        }

        for id in &changes.deletes {
            sqlx::query("DELETE FROM tracks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        for id in &changes.group_deletes {
            sqlx::query("DELETE FROM media_groups WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;

        debug!("Change set applied");
        Ok(())
    }
}

async fn insert_track(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    record: &TrackRecord,
) -> Result<SqliteQueryResult, PersistError> {
    sqlx::query(
        r#"
        INSERT INTO tracks (
            id, source_id, locator,
            title, album_title, artist_name, genre_name,
            duration_ms, track_number, disc_number,
            modified_at, content_fingerprint, artwork_ref,
            album_upstream_id, artist_upstream_id, genre_upstream_id,
            album_id, artist_id, genre_id,
            created_at, updated_at
        ) VALUES (
            ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?,
            ?, ?
        )
        "#,
    )
    .bind(&record.id)
    .bind(&record.source_id)
    .bind(&record.locator)
    .bind(&record.title)
    .bind(&record.album_title)
    .bind(&record.artist_name)
    .bind(&record.genre_name)
    .bind(record.duration_ms)
    .bind(record.track_number)
    .bind(record.disc_number)
    .bind(record.modified_at)
    .bind(&record.content_fingerprint)
    .bind(&record.artwork_ref)
    .bind(&record.album_upstream_id)
    .bind(&record.artist_upstream_id)
    .bind(&record.genre_upstream_id)
    .bind(&record.album_id)
    .bind(&record.artist_id)
    .bind(&record.genre_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(classify)
}

async fn update_track(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    record: &TrackRecord,
) -> Result<SqliteQueryResult, PersistError> {
    sqlx::query(
        r#"
        UPDATE tracks SET
            title = ?, album_title = ?, artist_name = ?, genre_name = ?,
            duration_ms = ?, track_number = ?, disc_number = ?,
            modified_at = ?, content_fingerprint = ?, artwork_ref = ?,
            album_upstream_id = ?, artist_upstream_id = ?, genre_upstream_id = ?,
            album_id = ?, artist_id = ?, genre_id = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&record.title)
    .bind(&record.album_title)
    .bind(&record.artist_name)
    .bind(&record.genre_name)
    .bind(record.duration_ms)
    .bind(record.track_number)
    .bind(record.disc_number)
    .bind(record.modified_at)
    .bind(&record.content_fingerprint)
    .bind(&record.artwork_ref)
    .bind(&record.album_upstream_id)
    .bind(&record.artist_upstream_id)
    .bind(&record.genre_upstream_id)
    .bind(&record.album_id)
    .bind(&record.artist_id)
    .bind(&record.genre_id)
    .bind(record.updated_at)
    .bind(&record.id)
    .execute(&mut **tx)
    .await
    .map_err(classify)
}

async fn upsert_group(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    group: &GroupRecord,
) -> Result<SqliteQueryResult, PersistError> {
    sqlx::query(
        r#"
        INSERT INTO media_groups (
            id, kind, name, sort_key, upstream_id,
            track_count, artwork_ref, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            upstream_id = excluded.upstream_id,
            track_count = excluded.track_count,
            artwork_ref = excluded.artwork_ref,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&group.id)
    .bind(group.kind)
    .bind(&group.name)
    .bind(&group.sort_key)
    .bind(&group.upstream_id)
    .bind(group.track_count)
    .bind(&group.artwork_ref)
    .bind(group.created_at)
    .bind(group.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(classify)
}

/// Map a database failure onto the persist taxonomy.
///
/// Schema drift shows up as SQLite "no such table/column" messages and is
/// terminal; constraint violations mean the change set raced another
/// writer; everything else is treated as transient storage trouble.
fn classify(e: sqlx::Error) -> PersistError {
    match &e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("no such table")
                || lowered.contains("no such column")
                || lowered.contains("has no column")
            {
                return PersistError::SchemaMismatch(message);
            }
            match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => PersistError::Conflict(message),
                _ => PersistError::IoFailure(message),
            }
        }
        _ => PersistError::IoFailure(e.to_string()),
    }
}
