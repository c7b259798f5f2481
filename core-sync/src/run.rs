//! # Sync Run Lifecycle
//!
//! Identifies runs, tracks their progress, and validates phase transitions.
//!
//! ## Overview
//!
//! Every call to `start_sync` mints a [`SyncRunId`] and drives one run through
//! the phase machine below. A run's current phase, per-kind progress counters,
//! accumulated item errors, and (once finished) change statistics are bundled
//! into a [`SyncStatus`] snapshot that observers receive through the state
//! reporter.
//!
//! ## Phase Machine
//!
//! ```text
//! Idle → Enumerating → Extracting → Reconciling → Persisting → Completed
//!              ↓            ↓            ↓  ↓          ↓
//!              ↓            ↓            ↓  └────→ Completed (no changes)
//!              └────────────┴────→ Cancelling / Failed
//!
//! Cancelling → Idle            (run wound down, nothing took its place)
//! Cancelling → Enumerating     (a superseding run began immediately)
//! Completed / Failed → Enumerating
//! ```
//!
//! `Completed` with a non-empty error list is a partial success: everything
//! that could be synchronized was, and the failures are enumerated alongside.

use crate::{Result, SyncError};
use bridge_traits::{ContentKind, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a single synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SyncRunId> for Uuid {
    fn from(id: SyncRunId) -> Self {
        id.0
    }
}

// ============================================================================
// Phase Machine
// ============================================================================

/// The phase a synchronization run is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No run in flight
    Idle,
    /// Walking the source and collecting locators
    Enumerating,
    /// Reading metadata for discovered items
    Extracting,
    /// Diffing fresh metadata against the stored snapshot
    Reconciling,
    /// Applying the computed change set to the store
    Persisting,
    /// A cancellation was requested and the run is winding down
    Cancelling,
    /// The run finished; errors may still be attached (partial success)
    Completed,
    /// The run ended early on an infrastructure failure
    Failed,
}

impl SyncState {
    /// Check whether this phase ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed)
    }

    /// Check whether a run is in flight in this phase
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Enumerating
                | SyncState::Extracting
                | SyncState::Reconciling
                | SyncState::Persisting
                | SyncState::Cancelling
        )
    }

    /// Get the string representation used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Enumerating => "enumerating",
            SyncState::Extracting => "extracting",
            SyncState::Reconciling => "reconciling",
            SyncState::Persisting => "persisting",
            SyncState::Cancelling => "cancelling",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
        }
    }

    /// Check whether the phase machine permits moving from `self` to `to`
    pub fn can_transition_to(self, to: SyncState) -> bool {
        match (self, to) {
            // Leaving the rest state
            (SyncState::Idle, SyncState::Enumerating) => true,

            // The pipeline in phase order
            (SyncState::Enumerating, SyncState::Extracting) => true,
            (SyncState::Extracting, SyncState::Reconciling) => true,
            (SyncState::Reconciling, SyncState::Persisting) => true,
            (SyncState::Persisting, SyncState::Completed) => true,

            // Reconciliation that produced no changes skips persistence
            (SyncState::Reconciling, SyncState::Completed) => true,

            // Any in-flight phase can be cancelled or fail
            (
                SyncState::Enumerating
                | SyncState::Extracting
                | SyncState::Reconciling
                | SyncState::Persisting,
                SyncState::Cancelling | SyncState::Failed,
            ) => true,

            // Cancellation settles back to rest, or straight into the run
            // that superseded it
            (SyncState::Cancelling, SyncState::Idle | SyncState::Enumerating) => true,

            // Finished runs may be followed by a new one
            (SyncState::Completed | SyncState::Failed, SyncState::Enumerating) => true,

            // Everything else is forbidden
            _ => false,
        }
    }

    /// Validate a transition, turning a forbidden move into an error
    pub fn transition_to(self, to: SyncState) -> Result<SyncState> {
        if !self.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            });
        }
        Ok(to)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// Item counters for one content kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounters {
    /// Items the enumeration has discovered
    pub discovered: u64,
    /// Items whose metadata was read successfully
    pub extracted: u64,
    /// Items that failed extraction and were skipped
    pub failed: u64,
}

/// Progress of a running sync, broken down by content kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    by_kind: BTreeMap<ContentKind, KindCounters>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one discovered item
    pub fn record_discovered(&mut self, kind: ContentKind) {
        self.by_kind.entry(kind).or_default().discovered += 1;
    }

    /// Count one successful extraction
    pub fn record_extracted(&mut self, kind: ContentKind) {
        self.by_kind.entry(kind).or_default().extracted += 1;
    }

    /// Count one failed extraction
    pub fn record_failed(&mut self, kind: ContentKind) {
        self.by_kind.entry(kind).or_default().failed += 1;
    }

    /// Counters for one kind, zeroed if that kind was never seen
    pub fn for_kind(&self, kind: ContentKind) -> KindCounters {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }

    /// Per-kind counters in kind order
    pub fn iter(&self) -> impl Iterator<Item = (ContentKind, KindCounters)> + '_ {
        self.by_kind.iter().map(|(k, c)| (*k, *c))
    }

    pub fn discovered_total(&self) -> u64 {
        self.by_kind.values().map(|c| c.discovered).sum()
    }

    pub fn extracted_total(&self) -> u64 {
        self.by_kind.values().map(|c| c.extracted).sum()
    }

    pub fn failed_total(&self) -> u64 {
        self.by_kind.values().map(|c| c.failed).sum()
    }

    /// Extraction progress percentage (0-100) across all kinds
    pub fn percent(&self) -> u8 {
        let discovered = self.discovered_total();
        if discovered == 0 {
            return 0;
        }
        let processed = self.extracted_total() + self.failed_total();
        ((processed as f64 / discovered as f64) * 100.0).min(100.0) as u8
    }
}

/// Statistics describing what a finished run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Tracks newly added to the library
    pub tracks_inserted: u64,
    /// Existing tracks whose metadata was refreshed
    pub tracks_updated: u64,
    /// Tracks removed because their items disappeared
    pub tracks_deleted: u64,
    /// Items that failed extraction and contributed nothing
    pub items_failed: u64,
}

impl RunStats {
    /// Total library mutations (inserted + updated + deleted)
    pub fn total_changed(&self) -> u64 {
        self.tracks_inserted + self.tracks_updated + self.tracks_deleted
    }
}

// ============================================================================
// Status Snapshot
// ============================================================================

/// Point-in-time view of the engine, as published by the state reporter
///
/// Snapshots are self-contained: a late subscriber receives the current one
/// and needs no history to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// The run this snapshot describes, absent when idle
    pub run_id: Option<SyncRunId>,
    /// Source the run is scoped to, absent when idle
    pub source_id: Option<SourceId>,
    /// Current phase
    pub state: SyncState,
    /// Per-kind item counters
    pub progress: SyncProgress,
    /// Item-level errors recorded so far, oldest first
    pub errors: Vec<SyncError>,
    /// Change statistics, present once a run completed
    pub stats: Option<RunStats>,
}

impl SyncStatus {
    /// The rest-state snapshot published before any run starts
    pub fn idle() -> Self {
        Self {
            run_id: None,
            source_id: None,
            state: SyncState::Idle,
            progress: SyncProgress::new(),
            errors: Vec::new(),
            stats: None,
        }
    }

    /// Check whether this is a completed run that skipped some items
    pub fn is_partial(&self) -> bool {
        self.state == SyncState::Completed && !self.errors.is_empty()
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let a = SyncRunId::new();
        let b = SyncRunId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_id_display_round_trips_through_uuid() {
        let id = SyncRunId::new();
        let uuid: Uuid = id.into();
        assert_eq!(SyncRunId::from(uuid), id);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn test_pipeline_phases_in_order() {
        assert!(SyncState::Idle.can_transition_to(SyncState::Enumerating));
        assert!(SyncState::Enumerating.can_transition_to(SyncState::Extracting));
        assert!(SyncState::Extracting.can_transition_to(SyncState::Reconciling));
        assert!(SyncState::Reconciling.can_transition_to(SyncState::Persisting));
        assert!(SyncState::Persisting.can_transition_to(SyncState::Completed));
    }

    #[test]
    fn test_no_change_run_completes_without_persisting() {
        assert!(SyncState::Reconciling.can_transition_to(SyncState::Completed));
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        assert!(!SyncState::Idle.can_transition_to(SyncState::Extracting));
        assert!(!SyncState::Enumerating.can_transition_to(SyncState::Reconciling));
        assert!(!SyncState::Enumerating.can_transition_to(SyncState::Completed));
        assert!(!SyncState::Extracting.can_transition_to(SyncState::Persisting));
    }

    #[test]
    fn test_any_in_flight_phase_can_cancel() {
        for from in [
            SyncState::Enumerating,
            SyncState::Extracting,
            SyncState::Reconciling,
            SyncState::Persisting,
        ] {
            assert!(from.can_transition_to(SyncState::Cancelling), "{from}");
        }
    }

    #[test]
    fn test_any_in_flight_phase_can_fail() {
        for from in [
            SyncState::Enumerating,
            SyncState::Extracting,
            SyncState::Reconciling,
            SyncState::Persisting,
        ] {
            assert!(from.can_transition_to(SyncState::Failed), "{from}");
        }
    }

    #[test]
    fn test_cancelling_settles_or_hands_off() {
        assert!(SyncState::Cancelling.can_transition_to(SyncState::Idle));
        assert!(SyncState::Cancelling.can_transition_to(SyncState::Enumerating));
        assert!(!SyncState::Cancelling.can_transition_to(SyncState::Completed));
        assert!(!SyncState::Cancelling.can_transition_to(SyncState::Failed));
    }

    #[test]
    fn test_terminal_phases_only_restart() {
        for from in [SyncState::Completed, SyncState::Failed] {
            assert!(from.can_transition_to(SyncState::Enumerating), "{from}");
            assert!(!from.can_transition_to(SyncState::Extracting), "{from}");
            assert!(!from.can_transition_to(SyncState::Cancelling), "{from}");
            assert!(!from.can_transition_to(SyncState::Idle), "{from}");
        }
    }

    #[test]
    fn test_idle_cannot_cancel_or_fail() {
        assert!(!SyncState::Idle.can_transition_to(SyncState::Cancelling));
        assert!(!SyncState::Idle.can_transition_to(SyncState::Failed));
    }

    #[test]
    fn test_transition_to_rejects_forbidden_moves() {
        let err = SyncState::Completed
            .transition_to(SyncState::Persisting)
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::InvalidTransition {
                from: "completed",
                to: "persisting",
            }
        );
        assert_eq!(
            SyncState::Idle.transition_to(SyncState::Enumerating).unwrap(),
            SyncState::Enumerating
        );
    }

    #[test]
    fn test_terminal_and_active_partition() {
        assert!(SyncState::Completed.is_terminal());
        assert!(SyncState::Failed.is_terminal());
        assert!(!SyncState::Idle.is_terminal());
        assert!(!SyncState::Cancelling.is_terminal());

        assert!(SyncState::Extracting.is_active());
        assert!(SyncState::Cancelling.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Completed.is_active());
    }

    #[test]
    fn test_progress_counts_per_kind() {
        let mut progress = SyncProgress::new();
        progress.record_discovered(ContentKind::Audio);
        progress.record_discovered(ContentKind::Audio);
        progress.record_discovered(ContentKind::Video);
        progress.record_extracted(ContentKind::Audio);
        progress.record_failed(ContentKind::Video);

        assert_eq!(progress.for_kind(ContentKind::Audio).discovered, 2);
        assert_eq!(progress.for_kind(ContentKind::Audio).extracted, 1);
        assert_eq!(progress.for_kind(ContentKind::Video).failed, 1);
        assert_eq!(progress.discovered_total(), 3);
        assert_eq!(progress.extracted_total(), 1);
        assert_eq!(progress.failed_total(), 1);
    }

    #[test]
    fn test_progress_percent() {
        let mut progress = SyncProgress::new();
        assert_eq!(progress.percent(), 0);

        for _ in 0..4 {
            progress.record_discovered(ContentKind::Audio);
        }
        progress.record_extracted(ContentKind::Audio);
        progress.record_failed(ContentKind::Audio);
        assert_eq!(progress.percent(), 50);
    }

    #[test]
    fn test_unseen_kind_reads_as_zero() {
        let progress = SyncProgress::new();
        assert_eq!(progress.for_kind(ContentKind::Audio), KindCounters::default());
    }

    #[test]
    fn test_stats_total_changed_excludes_failures() {
        let stats = RunStats {
            tracks_inserted: 3,
            tracks_updated: 2,
            tracks_deleted: 1,
            items_failed: 7,
        };
        assert_eq!(stats.total_changed(), 6);
    }

    #[test]
    fn test_idle_status_shape() {
        let status = SyncStatus::idle();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.run_id.is_none());
        assert!(status.source_id.is_none());
        assert!(status.errors.is_empty());
        assert!(status.stats.is_none());
        assert!(!status.is_partial());
    }

    #[test]
    fn test_completed_with_errors_is_partial() {
        let mut status = SyncStatus::idle();
        status.state = SyncState::Completed;
        assert!(!status.is_partial());

        status.errors.push(SyncError::Extraction {
            locator: "path:/m/broken.mp3".to_string(),
            message: "corrupt header".to_string(),
        });
        assert!(status.is_partial());
    }
}
