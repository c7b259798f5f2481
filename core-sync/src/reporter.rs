//! # Sync State Reporter
//!
//! Publishes the engine's current [`SyncStatus`] as an observable value.
//!
//! ## Overview
//!
//! Built on a `tokio::sync::watch` channel: observers see the latest
//! snapshot, not a history. A subscriber that arrives mid-run (or long after
//! a run finished) immediately reads the current status; terminal states
//! stay visible until the next run replaces them. The write side never
//! blocks on slow readers and works fine with no readers at all.

use crate::{SyncError, SyncStatus};
use tokio::sync::watch;

/// Shared handle publishing the engine's current status.
#[derive(Debug)]
pub struct SyncStateReporter {
    tx: watch::Sender<SyncStatus>,
}

impl SyncStateReporter {
    /// Create a reporter holding the idle status.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::idle());
        Self { tx }
    }

    /// Subscribe to status updates.
    ///
    /// The receiver immediately holds the current status; `changed()` then
    /// resolves on every subsequent publish.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// The status as of now.
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Replace the published status.
    ///
    /// Uses `send_replace` so the value is stored even while nobody is
    /// subscribed; late subscribers still see it.
    pub fn publish(&self, status: SyncStatus) {
        self.tx.send_replace(status);
    }

    /// Append an error to the published status without touching the rest.
    ///
    /// Watcher failures arrive outside any run, so they are folded into
    /// whatever status is current rather than replacing it.
    pub fn record_error(&self, error: SyncError) {
        self.tx.send_modify(|status| status.errors.push(error));
    }
}

impl Default for SyncStateReporter {
    fn default() -> Self {
        Self::new()
    }
}
