//! # Change Debouncing
//!
//! Coalesces bursts of raw change events per locator.
//!
//! ## Overview
//!
//! File writes arrive as rapid event bursts (editors write, truncate, rename;
//! downloaders append in chunks). Reconciling on every raw event would rescan
//! the same file dozens of times, so events are held in a pending map keyed
//! by locator and merged until a quiet period elapses or the pending cap is
//! hit. One flush drives exactly one reconciliation, however many raw events
//! fed it.
//!
//! [`ChangeDebouncer`] is the pure merge core; the timing half lives in the
//! watch pump, which owns the quiet-window clock.
//!
//! ## Merge rules
//!
//! Per locator, for a pending kind followed by an incoming kind:
//!
//! | pending  | incoming | result   |
//! |----------|----------|----------|
//! | Created  | Modified | Created  |
//! | Created  | Deleted  | (none)   |
//! | Modified | Deleted  | Deleted  |
//! | Deleted  | Created  | Modified |
//! | Deleted  | Modified | Modified |
//! | Modified | Created  | Modified |
//! | same     | same     | same     |
//!
//! `Created` then `Deleted` cancels out: the snapshot never saw the item, so
//! downstream has nothing to do. `Deleted` then `Created` is a replacement of
//! an item the snapshot does know, hence `Modified`.

use bridge_traits::{ChangeKind, RawChangeEvent};
use std::collections::BTreeMap;

/// Pending-change accumulator with per-locator coalescing and a hard cap.
#[derive(Debug)]
pub struct ChangeDebouncer {
    max_pending: usize,
    pending: BTreeMap<String, RawChangeEvent>,
}

impl ChangeDebouncer {
    /// Create a debouncer that force-flushes once `max_pending` distinct
    /// locators accumulate.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            pending: BTreeMap::new(),
        }
    }

    /// Fold one raw event into the pending set.
    ///
    /// Returns `Some(batch)` when the event pushed the pending set to its
    /// cap; the caller must dispatch the batch immediately instead of
    /// waiting out the quiet window.
    pub fn record(&mut self, event: RawChangeEvent) -> Option<Vec<RawChangeEvent>> {
        let key = event.locator.as_key();
        match self.pending.remove(&key) {
            None => {
                self.pending.insert(key, event);
            }
            Some(prior) => {
                if let Some(kind) = merge_kinds(prior.kind, event.kind) {
                    let mut merged = event;
                    merged.kind = kind;
                    self.pending.insert(key, merged);
                }
            }
        }

        if self.pending.len() >= self.max_pending {
            return Some(self.flush());
        }
        None
    }

    /// Take everything pending, in locator order.
    pub fn flush(&mut self) -> Vec<RawChangeEvent> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

fn merge_kinds(pending: ChangeKind, incoming: ChangeKind) -> Option<ChangeKind> {
    match (pending, incoming) {
        // An unseen item that disappeared again leaves no trace.
        (ChangeKind::Created, ChangeKind::Deleted) => None,
        // Still new to the snapshot, whatever happened since.
        (ChangeKind::Created, _) => Some(ChangeKind::Created),
        (ChangeKind::Modified, ChangeKind::Deleted) => Some(ChangeKind::Deleted),
        (ChangeKind::Modified, _) => Some(ChangeKind::Modified),
        // Deleted then re-observed is a replacement of a known item.
        (ChangeKind::Deleted, ChangeKind::Created | ChangeKind::Modified) => {
            Some(ChangeKind::Modified)
        }
        (ChangeKind::Deleted, ChangeKind::Deleted) => Some(ChangeKind::Deleted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::Locator;
    use std::path::PathBuf;

    fn event(path: &str, kind: ChangeKind) -> RawChangeEvent {
        RawChangeEvent::new(Locator::Path(PathBuf::from(path)), kind)
    }

    #[test]
    fn test_rapid_writes_coalesce_to_one_event() {
        let mut debouncer = ChangeDebouncer::new(4096);
        for _ in 0..20 {
            assert!(debouncer
                .record(event("/m/a.mp3", ChangeKind::Modified))
                .is_none());
        }

        let batch = debouncer.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Modified);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_created_then_modified_stays_created() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));
        debouncer.record(event("/m/a.mp3", ChangeKind::Modified));

        let batch = debouncer.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_created_then_deleted_cancels_out() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));
        debouncer.record(event("/m/a.mp3", ChangeKind::Deleted));

        assert!(debouncer.flush().is_empty());
    }

    #[test]
    fn test_modified_then_deleted_is_deleted() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Modified));
        debouncer.record(event("/m/a.mp3", ChangeKind::Deleted));

        let batch = debouncer.flush();
        assert_eq!(batch[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_deleted_then_created_is_modified() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Deleted));
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));

        let batch = debouncer.flush();
        assert_eq!(batch[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_distinct_locators_do_not_merge() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Modified));
        debouncer.record(event("/m/b.mp3", ChangeKind::Modified));

        assert_eq!(debouncer.len(), 2);
        assert_eq!(debouncer.flush().len(), 2);
    }

    #[test]
    fn test_cap_forces_immediate_flush() {
        let mut debouncer = ChangeDebouncer::new(3);
        assert!(debouncer
            .record(event("/m/a.mp3", ChangeKind::Modified))
            .is_none());
        assert!(debouncer
            .record(event("/m/b.mp3", ChangeKind::Modified))
            .is_none());

        let batch = debouncer
            .record(event("/m/c.mp3", ChangeKind::Modified))
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_merging_at_cap_does_not_flush() {
        let mut debouncer = ChangeDebouncer::new(3);
        debouncer.record(event("/m/a.mp3", ChangeKind::Modified));
        debouncer.record(event("/m/b.mp3", ChangeKind::Modified));

        // Same locator again: pending count stays below the cap.
        assert!(debouncer
            .record(event("/m/a.mp3", ChangeKind::Modified))
            .is_none());
        assert_eq!(debouncer.len(), 2);
    }

    #[test]
    fn test_cancelled_pair_followed_by_create_survives() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));
        debouncer.record(event("/m/a.mp3", ChangeKind::Deleted));
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));

        let batch = debouncer.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_flush_returns_locator_order() {
        let mut debouncer = ChangeDebouncer::new(4096);
        debouncer.record(event("/m/b.mp3", ChangeKind::Created));
        debouncer.record(event("/m/a.mp3", ChangeKind::Created));

        let batch = debouncer.flush();
        assert_eq!(batch[0].locator.as_key(), "path:/m/a.mp3");
        assert_eq!(batch[1].locator.as_key(), "path:/m/b.mp3");
    }
}
