//! # Reconciler
//!
//! Pure diffing of fresh extraction output against the stored snapshot.
//!
//! ## Overview
//!
//! Reconciliation happens in two steps, both free of I/O so every rule is
//! unit-testable:
//!
//! 1. [`diff_tracks`] compares fresh [`TrackRecord`]s against the stored
//!    [`TrackFingerprint`]s and classifies each id as inserted, updated,
//!    unchanged, or deleted.
//! 2. [`build_change_set`] recomputes the derived album/artist/genre groups
//!    from the post-change track set and assembles the final [`ChangeSet`],
//!    including tracks whose group membership moved even though their own
//!    metadata did not.
//!
//! ## Deletion authority
//!
//! A run may only infer deletions for locators it actually re-examined.
//! [`ReconcileScope`] encodes that authority: a full enumeration covers
//! everything, a subtree run covers one prefix, an incremental run covers
//! exactly the locators its change events named. Locators whose extraction
//! failed during the run are handed in separately and never deleted; their
//! current state is unknown, not absent.

use bridge_traits::Locator;
use core_library::{
    normalize_group_key, ChangeSet, GroupId, GroupKind, GroupRecord, TrackFingerprint, TrackId,
    TrackRecord,
};
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// Scope
// ============================================================================

/// Where a run's deletion authority ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    /// The whole source was enumerated; anything missing is gone.
    Full,
    /// Only locators under this prefix were enumerated.
    Subtree(Locator),
    /// Only these canonical locator keys were examined.
    Locators(HashSet<String>),
}

impl ReconcileScope {
    /// Whether a stored track at `locator_key` was examined by this run and
    /// may therefore be deleted when it turned up missing.
    pub fn covers(&self, locator_key: &str) -> bool {
        match self {
            Self::Full => true,
            Self::Subtree(root) => Locator::from_key(locator_key)
                .map(|locator| locator.starts_with(root))
                .unwrap_or(false),
            Self::Locators(keys) => keys.contains(locator_key),
        }
    }
}

// ============================================================================
// Track diff
// ============================================================================

/// Track-level outcome of a reconciliation, before group recomputation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDiff {
    /// Fresh records whose id is not in the snapshot
    pub inserts: Vec<TrackRecord>,
    /// Fresh records whose stored counterpart is stale
    pub updates: Vec<TrackRecord>,
    /// Stored ids the run examined and found missing
    pub deletes: Vec<TrackId>,
}

impl TrackDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Classify fresh records against the stored fingerprints.
///
/// Change detection per id: when both sides carry a content fingerprint it
/// decides alone, otherwise `modified_at` decides. Ids the snapshot knows
/// but the run did not deliver become deletions only when `scope` covers
/// their locator and the locator is not in `failed_locators`.
///
/// Output vectors are sorted by id, so equal inputs produce equal diffs
/// regardless of extraction completion order.
pub fn diff_tracks(
    existing: &[TrackFingerprint],
    fresh: Vec<TrackRecord>,
    scope: &ReconcileScope,
    failed_locators: &HashSet<String>,
) -> TrackDiff {
    let existing_by_id: HashMap<&TrackId, &TrackFingerprint> =
        existing.iter().map(|fp| (&fp.id, fp)).collect();
    let seen: HashSet<&TrackId> = fresh.iter().map(|record| &record.id).collect();

    let mut deletes: Vec<TrackId> = existing
        .iter()
        .filter(|stored| {
            !seen.contains(&stored.id)
                && !failed_locators.contains(&stored.locator)
                && scope.covers(&stored.locator)
        })
        .map(|stored| stored.id.clone())
        .collect();

    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for record in fresh {
        match existing_by_id.get(&record.id) {
            None => inserts.push(record),
            Some(stored) => {
                if stored.differs_from(record.modified_at, record.content_fingerprint.as_deref()) {
                    updates.push(record);
                }
            }
        }
    }

    inserts.sort_by(|a, b| a.id.cmp(&b.id));
    updates.sort_by(|a, b| a.id.cmp(&b.id));
    deletes.sort();

    TrackDiff {
        inserts,
        updates,
        deletes,
    }
}

// ============================================================================
// Group recomputation
// ============================================================================

/// One derived group as recomputed from the post-change track set,
/// timestamps not yet decided.
#[derive(Debug, Clone)]
struct ComputedGroup {
    id: GroupId,
    kind: GroupKind,
    name: String,
    sort_key: String,
    upstream_id: Option<String>,
    track_count: i64,
    artwork_ref: Option<String>,
}

impl ComputedGroup {
    fn into_record(self, created_at: i64, updated_at: i64) -> GroupRecord {
        GroupRecord {
            id: self.id,
            kind: self.kind,
            name: self.name,
            sort_key: self.sort_key,
            upstream_id: self.upstream_id,
            track_count: self.track_count,
            artwork_ref: self.artwork_ref,
            created_at,
            updated_at,
        }
    }
}

/// The groups of one kind plus the membership each surviving track resolved
/// to.
struct KindGrouping {
    groups: Vec<ComputedGroup>,
    assignment: HashMap<TrackId, GroupId>,
}

/// The (name, upstream id) pair a track contributes along one grouping axis.
fn kind_fields(kind: GroupKind, track: &TrackRecord) -> (Option<&str>, Option<&str>) {
    match kind {
        GroupKind::Album => (
            track.album_title.as_deref(),
            track.album_upstream_id.as_deref(),
        ),
        GroupKind::Artist => (
            track.artist_name.as_deref(),
            track.artist_upstream_id.as_deref(),
        ),
        GroupKind::Genre => (
            track.genre_name.as_deref(),
            track.genre_upstream_id.as_deref(),
        ),
    }
}

/// Bucket the post-change tracks along one axis and resolve each bucket to
/// one or more groups.
///
/// Buckets key on the case-folded name. A bucket with no upstream ids is one
/// name-keyed group. A bucket where exactly one distinct upstream id appears
/// is one group carrying that id, and every member joins it. A bucket with
/// two or more distinct upstream ids keeps them as separate groups, with the
/// unlabeled members in a name-keyed group of their own; conflicting
/// identities are preserved, never merged by guesswork.
fn group_by_kind(kind: GroupKind, post: &BTreeMap<TrackId, TrackRecord>) -> KindGrouping {
    let mut buckets: BTreeMap<String, Vec<&TrackRecord>> = BTreeMap::new();
    for track in post.values() {
        let (name, _) = kind_fields(kind, track);
        let Some(name) = name else { continue };
        let key = normalize_group_key(name);
        if key.is_empty() {
            continue;
        }
        buckets.entry(key).or_default().push(track);
    }

    let mut grouping = KindGrouping {
        groups: Vec::new(),
        assignment: HashMap::new(),
    };

    for (key, members) in &buckets {
        let mut distinct_ids: Vec<&str> = Vec::new();
        for track in members {
            if let (_, Some(upstream)) = kind_fields(kind, track) {
                if !distinct_ids.contains(&upstream) {
                    distinct_ids.push(upstream);
                }
            }
        }

        match distinct_ids.as_slice() {
            [] => push_group(&mut grouping, kind, key, None, members),
            [only] => push_group(&mut grouping, kind, key, Some(only), members),
            several => {
                for upstream in several {
                    let claimed: Vec<&TrackRecord> = members
                        .iter()
                        .copied()
                        .filter(|track| kind_fields(kind, track).1 == Some(*upstream))
                        .collect();
                    push_group(&mut grouping, kind, key, Some(upstream), &claimed);
                }
                let unlabeled: Vec<&TrackRecord> = members
                    .iter()
                    .copied()
                    .filter(|track| kind_fields(kind, track).1.is_none())
                    .collect();
                if !unlabeled.is_empty() {
                    push_group(&mut grouping, kind, key, None, &unlabeled);
                }
            }
        }
    }

    grouping
}

fn push_group(
    grouping: &mut KindGrouping,
    kind: GroupKind,
    key: &str,
    upstream: Option<&str>,
    members: &[&TrackRecord],
) {
    let Some(first) = members.first() else { return };
    let id = GroupId::derive(kind, key, upstream);

    // Members come in TrackId order, so the display name and representative
    // artwork (first member that has any) are deterministic.
    let name = kind_fields(kind, first)
        .0
        .unwrap_or(key)
        .to_string();
    let artwork_ref = members
        .iter()
        .find_map(|track| track.artwork_ref.clone());

    for member in members {
        grouping.assignment.insert(member.id.clone(), id.clone());
    }
    grouping.groups.push(ComputedGroup {
        id,
        kind,
        name,
        sort_key: key.to_string(),
        upstream_id: upstream.map(str::to_string),
        track_count: members.len() as i64,
        artwork_ref,
    });
}

fn assign_membership(
    record: &mut TrackRecord,
    albums: &KindGrouping,
    artists: &KindGrouping,
    genres: &KindGrouping,
) {
    record.album_id = albums.assignment.get(&record.id).cloned();
    record.artist_id = artists.assignment.get(&record.id).cloned();
    record.genre_id = genres.assignment.get(&record.id).cloned();
}

/// Whether a recomputed group differs from its stored counterpart in any
/// field the store keeps. Kind, sort key and upstream id are fixed by the
/// group's derived id and cannot diverge.
fn group_changed(existing: &GroupRecord, computed: &ComputedGroup) -> bool {
    existing.name != computed.name
        || existing.track_count != computed.track_count
        || existing.artwork_ref != computed.artwork_ref
}

// ============================================================================
// Change-set assembly
// ============================================================================

/// Turn a track diff into the complete [`ChangeSet`] the store applies.
///
/// `all_tracks` and `existing_groups` are the full stored snapshot. Groups
/// are global across sources, so even a single-source run recomputes them
/// from the whole post-change track set. Stored tracks whose resolved
/// membership moved are promoted into `updates` with `updated_at` set to
/// `now`; a group that ends up with zero members is deleted; a group whose
/// recomputed fields match the stored row is left untouched.
pub fn build_change_set(
    diff: TrackDiff,
    all_tracks: &[TrackRecord],
    existing_groups: &[GroupRecord],
    now: i64,
) -> ChangeSet {
    if diff.is_empty() {
        return ChangeSet::default();
    }

    // The track set as it will stand after this change set is applied,
    // keyed by id so all downstream iteration is deterministic.
    let mut post: BTreeMap<TrackId, TrackRecord> = all_tracks
        .iter()
        .map(|track| (track.id.clone(), track.clone()))
        .collect();
    for id in &diff.deletes {
        post.remove(id);
    }
    for record in diff.updates.iter().chain(diff.inserts.iter()) {
        post.insert(record.id.clone(), record.clone());
    }

    let albums = group_by_kind(GroupKind::Album, &post);
    let artists = group_by_kind(GroupKind::Artist, &post);
    let genres = group_by_kind(GroupKind::Genre, &post);

    let existing_by_id: HashMap<&GroupId, &GroupRecord> =
        existing_groups.iter().map(|group| (&group.id, group)).collect();

    let mut computed_ids: HashSet<GroupId> = HashSet::new();
    let mut group_upserts: Vec<GroupRecord> = Vec::new();
    for computed in albums
        .groups
        .iter()
        .chain(artists.groups.iter())
        .chain(genres.groups.iter())
    {
        computed_ids.insert(computed.id.clone());
        match existing_by_id.get(&computed.id) {
            None => group_upserts.push(computed.clone().into_record(now, now)),
            Some(existing) if group_changed(existing, computed) => {
                group_upserts.push(computed.clone().into_record(existing.created_at, now));
            }
            Some(_) => {}
        }
    }

    let mut group_deletes: Vec<GroupId> = existing_groups
        .iter()
        .filter(|group| !computed_ids.contains(&group.id))
        .map(|group| group.id.clone())
        .collect();

    group_upserts.sort_by(|a, b| a.id.cmp(&b.id));
    group_deletes.sort();

    // Stamp resolved memberships onto the changed records, then sweep the
    // untouched survivors for membership moves caused by this run.
    let mut inserts = diff.inserts;
    for record in inserts.iter_mut() {
        assign_membership(record, &albums, &artists, &genres);
    }

    let mut updates: BTreeMap<TrackId, TrackRecord> = diff
        .updates
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect();
    for record in updates.values_mut() {
        assign_membership(record, &albums, &artists, &genres);
    }

    for stored in all_tracks {
        if updates.contains_key(&stored.id) || !post.contains_key(&stored.id) {
            continue;
        }
        let mut candidate = stored.clone();
        assign_membership(&mut candidate, &albums, &artists, &genres);
        if candidate.album_id != stored.album_id
            || candidate.artist_id != stored.artist_id
            || candidate.genre_id != stored.genre_id
        {
            candidate.updated_at = now;
            updates.insert(candidate.id.clone(), candidate);
        }
    }

    ChangeSet {
        inserts,
        updates: updates.into_values().collect(),
        deletes: diff.deletes,
        group_upserts,
        group_deletes,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{ExtractedTrack, SourceId};
    use std::path::PathBuf;

    const NOW: i64 = 1_700_000_000_000;

    fn track(path: &str, title: &str, modified_at: i64) -> TrackRecord {
        let mut extracted =
            ExtractedTrack::new(Locator::Path(PathBuf::from(path)), modified_at);
        extracted.title = Some(title.to_string());
        TrackRecord::from_extracted(&SourceId::new("local"), &extracted, NOW)
    }

    fn with_album(mut record: TrackRecord, album: &str, upstream: Option<&str>) -> TrackRecord {
        record.album_title = Some(album.to_string());
        record.album_upstream_id = upstream.map(str::to_string);
        record
    }

    fn with_artist(mut record: TrackRecord, artist: &str) -> TrackRecord {
        record.artist_name = Some(artist.to_string());
        record
    }

    fn with_artwork(mut record: TrackRecord, artwork: &str) -> TrackRecord {
        record.artwork_ref = Some(artwork.to_string());
        record
    }

    fn fingerprint(record: &TrackRecord) -> TrackFingerprint {
        TrackFingerprint {
            id: record.id.clone(),
            locator: record.locator.clone(),
            modified_at: record.modified_at,
            content_fingerprint: record.content_fingerprint.clone(),
        }
    }

    /// Minimal in-memory stand-in for the snapshot store, used to chain
    /// reconciliations in tests.
    #[derive(Default)]
    struct State {
        tracks: BTreeMap<TrackId, TrackRecord>,
        groups: BTreeMap<GroupId, GroupRecord>,
    }

    impl State {
        fn apply(&mut self, change_set: &ChangeSet) {
            change_set.validate().unwrap();
            for record in change_set.inserts.iter().chain(change_set.updates.iter()) {
                self.tracks.insert(record.id.clone(), record.clone());
            }
            for id in &change_set.deletes {
                self.tracks.remove(id);
            }
            for group in &change_set.group_upserts {
                self.groups.insert(group.id.clone(), group.clone());
            }
            for id in &change_set.group_deletes {
                self.groups.remove(id);
            }
        }

        fn fingerprints(&self) -> Vec<TrackFingerprint> {
            self.tracks.values().map(fingerprint).collect()
        }

        fn tracks(&self) -> Vec<TrackRecord> {
            self.tracks.values().cloned().collect()
        }

        fn groups(&self) -> Vec<GroupRecord> {
            self.groups.values().cloned().collect()
        }

        fn reconcile(&mut self, fresh: Vec<TrackRecord>, scope: ReconcileScope) -> ChangeSet {
            let diff = diff_tracks(&self.fingerprints(), fresh, &scope, &HashSet::new());
            let change_set = build_change_set(diff, &self.tracks(), &self.groups(), NOW);
            self.apply(&change_set);
            change_set
        }
    }

    #[test]
    fn test_first_scan_inserts_everything() {
        let fresh = vec![
            with_artist(track("/music/a.mp3", "A", 10), "Ana"),
            with_artist(track("/music/b.mp3", "B", 20), "Ben"),
        ];

        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        assert_eq!(diff.inserts.len(), 2);
        assert!(diff.updates.is_empty());
        assert!(diff.deletes.is_empty());

        let change_set = build_change_set(diff, &[], &[], NOW);
        assert_eq!(change_set.inserts.len(), 2);
        assert_eq!(change_set.group_upserts.len(), 2);
        assert!(change_set.inserts.iter().all(|t| t.artist_id.is_some()));
    }

    #[test]
    fn test_unchanged_rescan_produces_no_changes() {
        let mut state = State::default();
        let fresh = vec![
            with_artist(track("/music/a.mp3", "A", 10), "Ana"),
            with_artist(track("/music/b.mp3", "B", 20), "Ana"),
        ];
        state.reconcile(fresh.clone(), ReconcileScope::Full);

        let second = state.reconcile(fresh, ReconcileScope::Full);
        assert!(second.is_empty());
    }

    #[test]
    fn test_modified_timestamp_is_an_update() {
        let stored = track("/music/a.mp3", "A", 10);
        let fresh = track("/music/a.mp3", "A remastered", 99);

        let diff = diff_tracks(
            &[fingerprint(&stored)],
            vec![fresh],
            &ReconcileScope::Full,
            &HashSet::new(),
        );
        assert!(diff.inserts.is_empty());
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.updates[0].title, "A remastered");
    }

    #[test]
    fn test_equal_fingerprints_override_timestamp_change() {
        let mut stored = track("/music/a.mp3", "A", 10);
        stored.content_fingerprint = Some("abc".to_string());
        let mut fresh = track("/music/a.mp3", "A", 99);
        fresh.content_fingerprint = Some("abc".to_string());

        let diff = diff_tracks(
            &[fingerprint(&stored)],
            vec![fresh],
            &ReconcileScope::Full,
            &HashSet::new(),
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn test_fingerprint_change_wins_over_equal_timestamps() {
        let mut stored = track("/music/a.mp3", "A", 10);
        stored.content_fingerprint = Some("abc".to_string());
        let mut fresh = track("/music/a.mp3", "A", 10);
        fresh.content_fingerprint = Some("def".to_string());

        let diff = diff_tracks(
            &[fingerprint(&stored)],
            vec![fresh],
            &ReconcileScope::Full,
            &HashSet::new(),
        );
        assert_eq!(diff.updates.len(), 1);
    }

    #[test]
    fn test_full_scope_deletes_missing_tracks() {
        let kept = track("/music/a.mp3", "A", 10);
        let gone = track("/music/b.mp3", "B", 20);

        let diff = diff_tracks(
            &[fingerprint(&kept), fingerprint(&gone)],
            vec![kept.clone()],
            &ReconcileScope::Full,
            &HashSet::new(),
        );
        assert_eq!(diff.deletes, vec![gone.id.clone()]);
    }

    #[test]
    fn test_subtree_scope_never_deletes_outside() {
        let inside = track("/music/rock/a.mp3", "A", 10);
        let outside = track("/music/jazz/b.mp3", "B", 20);
        let scope = ReconcileScope::Subtree(Locator::Path(PathBuf::from("/music/rock")));

        let diff = diff_tracks(
            &[fingerprint(&inside), fingerprint(&outside)],
            Vec::new(),
            &scope,
            &HashSet::new(),
        );
        assert_eq!(diff.deletes, vec![inside.id.clone()]);
    }

    #[test]
    fn test_locator_scope_deletes_only_declared_keys() {
        let declared = track("/music/a.mp3", "A", 10);
        let untouched = track("/music/b.mp3", "B", 20);
        let scope =
            ReconcileScope::Locators(HashSet::from([declared.locator.clone()]));

        let diff = diff_tracks(
            &[fingerprint(&declared), fingerprint(&untouched)],
            Vec::new(),
            &scope,
            &HashSet::new(),
        );
        assert_eq!(diff.deletes, vec![declared.id.clone()]);
    }

    #[test]
    fn test_failed_extraction_is_never_deleted() {
        let broken = track("/music/a.mp3", "A", 10);
        let gone = track("/music/b.mp3", "B", 20);
        let failed = HashSet::from([broken.locator.clone()]);

        let diff = diff_tracks(
            &[fingerprint(&broken), fingerprint(&gone)],
            Vec::new(),
            &ReconcileScope::Full,
            &failed,
        );
        assert_eq!(diff.deletes, vec![gone.id.clone()]);
    }

    #[test]
    fn test_groups_bucket_by_folded_name() {
        let fresh = vec![
            with_artist(track("/m/a.mp3", "A", 1), "The Beatles"),
            with_artist(track("/m/b.mp3", "B", 1), "the beatles"),
            with_artist(track("/m/c.mp3", "C", 1), " THE  BEATLES "),
        ];
        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        let change_set = build_change_set(diff, &[], &[], NOW);

        assert_eq!(change_set.group_upserts.len(), 1);
        let group = &change_set.group_upserts[0];
        assert_eq!(group.track_count, 3);
        assert_eq!(group.sort_key, "the beatles");
        // Display name comes from the first member in id order.
        let first = change_set
            .inserts
            .iter()
            .min_by(|a, b| a.id.cmp(&b.id))
            .unwrap();
        assert_eq!(Some(group.name.as_str()), first.artist_name.as_deref());
        assert!(change_set
            .inserts
            .iter()
            .all(|t| t.artist_id.as_ref() == Some(&group.id)));
    }

    #[test]
    fn test_single_upstream_id_claims_whole_bucket() {
        let fresh = vec![
            with_album(track("/m/a.mp3", "A", 1), "Revolver", Some("alb-1")),
            with_album(track("/m/b.mp3", "B", 1), "revolver", None),
            with_album(track("/m/c.mp3", "C", 1), "Revolver", None),
        ];
        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        let change_set = build_change_set(diff, &[], &[], NOW);

        assert_eq!(change_set.group_upserts.len(), 1);
        let group = &change_set.group_upserts[0];
        assert_eq!(group.track_count, 3);
        assert_eq!(group.upstream_id.as_deref(), Some("alb-1"));
        assert_eq!(group.id, GroupId::derive(GroupKind::Album, "revolver", Some("alb-1")));
        assert!(change_set
            .inserts
            .iter()
            .all(|t| t.album_id.as_ref() == Some(&group.id)));
    }

    #[test]
    fn test_conflicting_upstream_ids_stay_separate() {
        let fresh = vec![
            with_album(track("/m/a.mp3", "A", 1), "Greatest Hits", Some("x")),
            with_album(track("/m/b.mp3", "B", 1), "Greatest Hits", Some("y")),
            with_album(track("/m/c.mp3", "C", 1), "Greatest Hits", None),
        ];
        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        let change_set = build_change_set(diff, &[], &[], NOW);

        assert_eq!(change_set.group_upserts.len(), 3);
        assert!(change_set
            .group_upserts
            .iter()
            .all(|group| group.track_count == 1));
        let upstreams: Vec<Option<&str>> = change_set
            .group_upserts
            .iter()
            .map(|group| group.upstream_id.as_deref())
            .collect();
        assert!(upstreams.contains(&Some("x")));
        assert!(upstreams.contains(&Some("y")));
        assert!(upstreams.contains(&None));
    }

    #[test]
    fn test_nameless_tracks_join_no_group() {
        let fresh = vec![track("/m/a.mp3", "A", 1)];
        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        let change_set = build_change_set(diff, &[], &[], NOW);

        assert!(change_set.group_upserts.is_empty());
        assert!(change_set.inserts[0].album_id.is_none());
        assert!(change_set.inserts[0].artist_id.is_none());
        assert!(change_set.inserts[0].genre_id.is_none());
    }

    #[test]
    fn test_whitespace_only_name_joins_no_group() {
        let fresh = vec![with_artist(track("/m/a.mp3", "A", 1), "   ")];
        let diff = diff_tracks(&[], fresh, &ReconcileScope::Full, &HashSet::new());
        let change_set = build_change_set(diff, &[], &[], NOW);

        assert!(change_set.group_upserts.is_empty());
        assert!(change_set.inserts[0].artist_id.is_none());
    }

    #[test]
    fn test_zero_member_group_is_deleted() {
        let mut state = State::default();
        state.reconcile(
            vec![with_artist(track("/m/a.mp3", "A", 1), "Ana")],
            ReconcileScope::Full,
        );
        assert_eq!(state.groups().len(), 1);

        let change_set = state.reconcile(Vec::new(), ReconcileScope::Full);
        assert_eq!(change_set.deletes.len(), 1);
        assert_eq!(change_set.group_deletes.len(), 1);
        assert!(state.groups().is_empty());
    }

    #[test]
    fn test_membership_move_promotes_unchanged_track() {
        let mut state = State::default();
        let original = with_album(track("/m/a.mp3", "A", 1), "Revolver", None);
        state.reconcile(vec![original.clone()], ReconcileScope::Full);

        let name_keyed = GroupId::derive(GroupKind::Album, "revolver", None);
        assert_eq!(
            state.tracks()[0].album_id.as_ref(),
            Some(&name_keyed)
        );

        // A new member arrives carrying the authoritative id; the whole
        // bucket migrates to it.
        let newcomer = with_album(track("/m/b.mp3", "B", 1), "Revolver", Some("alb-1"));
        let change_set = state.reconcile(vec![original, newcomer], ReconcileScope::Full);

        let claimed = GroupId::derive(GroupKind::Album, "revolver", Some("alb-1"));
        assert_eq!(change_set.inserts.len(), 1);
        assert_eq!(change_set.updates.len(), 1);
        assert_eq!(change_set.updates[0].album_id.as_ref(), Some(&claimed));
        assert_eq!(change_set.group_deletes, vec![name_keyed]);
        assert_eq!(state.groups().len(), 1);
        assert_eq!(state.groups()[0].track_count, 2);
    }

    #[test]
    fn test_group_count_and_artwork_recompute() {
        let mut state = State::default();
        let plain = with_artist(track("/m/a.mp3", "A", 1), "Ana");
        state.reconcile(vec![plain.clone()], ReconcileScope::Full);
        assert!(state.groups()[0].artwork_ref.is_none());

        let decorated = with_artwork(
            with_artist(track("/m/b.mp3", "B", 1), "Ana"),
            "/m/cover.jpg",
        );
        state.reconcile(vec![plain, decorated], ReconcileScope::Full);

        let group = &state.groups()[0];
        assert_eq!(group.track_count, 2);
        assert_eq!(group.artwork_ref.as_deref(), Some("/m/cover.jpg"));
    }

    #[test]
    fn test_unchanged_group_is_not_reupserted() {
        let mut state = State::default();
        let a = with_artist(track("/m/a.mp3", "A", 1), "Ana");
        let b = with_artist(track("/m/b.mp3", "B", 1), "Ben");
        state.reconcile(vec![a.clone(), b.clone()], ReconcileScope::Full);

        // Touch only one track; the other artist's group has nothing new.
        let mut bumped = a.clone();
        bumped.modified_at = 2;
        let change_set = state.reconcile(vec![bumped, b], ReconcileScope::Full);

        assert_eq!(change_set.updates.len(), 1);
        assert!(change_set.group_upserts.is_empty());
        assert!(change_set.group_deletes.is_empty());
    }

    #[test]
    fn test_change_set_ids_are_disjoint() {
        let mut state = State::default();
        state.reconcile(
            vec![
                with_artist(track("/m/a.mp3", "A", 1), "Ana"),
                with_artist(track("/m/b.mp3", "B", 1), "Ana"),
            ],
            ReconcileScope::Full,
        );

        let bumped = with_artist(track("/m/a.mp3", "A2", 2), "Ana");
        let fresh = vec![bumped, with_artist(track("/m/c.mp3", "C", 1), "Cleo")];
        let change_set = state.reconcile(fresh, ReconcileScope::Full);

        // One insert, one update, one delete in the same set.
        assert_eq!(change_set.inserts.len(), 1);
        assert_eq!(change_set.updates.len(), 1);
        assert_eq!(change_set.deletes.len(), 1);
        assert!(change_set.validate().is_ok());
    }

    #[test]
    fn test_diff_output_is_sorted_regardless_of_input_order() {
        let a = track("/m/a.mp3", "A", 1);
        let b = track("/m/b.mp3", "B", 1);

        let forward = diff_tracks(
            &[],
            vec![a.clone(), b.clone()],
            &ReconcileScope::Full,
            &HashSet::new(),
        );
        let reversed = diff_tracks(&[], vec![b, a], &ReconcileScope::Full, &HashSet::new());
        assert_eq!(forward, reversed);
    }
}
