//! # Sync Engine Module
//!
//! Keeps the library snapshot convergent with registered media sources.
//!
//! ## Overview
//!
//! This module manages the lifecycle of synchronization runs, including:
//! - Enumerating source content via `MediaSource`
//! - Extracting metadata under a bounded worker pool
//! - Reconciling fresh observations against the stored snapshot
//! - Recomputing derived album, artist, and genre groups
//! - Applying the resulting change set transactionally
//! - Debouncing change notifications into incremental runs
//!
//! ## Components
//!
//! - **Run State Machine** (`run`): Sync run lifecycle with validated phase transitions
//! - **Reconciler** (`reconciler`): Pure diffing of fresh observations against the snapshot
//! - **Change Debouncer** (`debounce`): Collapses raw change bursts into one batch
//! - **Watcher** (`watcher`): Supervised change-stream pumps with restart backoff
//! - **Reporter** (`reporter`): Status publication over a watch channel
//! - **Orchestrator** (`orchestrator`): Drives runs end to end, one active at a time

pub mod debounce;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod reporter;
pub mod run;
pub mod watcher;

pub use debounce::ChangeDebouncer;
pub use error::{Result, SyncError};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use reconciler::{build_change_set, diff_tracks, ReconcileScope, TrackDiff};
pub use reporter::SyncStateReporter;
pub use run::{
    KindCounters, RunStats, SyncProgress, SyncRunId, SyncState, SyncStatus,
};
