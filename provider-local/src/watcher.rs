//! Filesystem Change Watching
//!
//! Bridges `notify` platform backends (inotify, FSEvents,
//! `ReadDirectoryChangesW`) onto the engine's raw change-event stream.
//! Events are forwarded as-is; coalescing and debouncing happen further
//! up, where events from every source variant meet.

use bridge_traits::{
    ChangeKind, ChangeStream, Locator, RawChangeEvent, WatchError, CHANGE_CHANNEL_CAPACITY,
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::source::matches_extension;

/// Start a recursive watcher on `dir` and hand its events back as a
/// [`ChangeStream`].
///
/// The watcher lives on a keeper task that drops it when the stream is
/// stopped; dropping the backend closes the channel, which ends the
/// stream on the consumer side.
pub(crate) fn spawn_change_stream(
    dir: PathBuf,
    extensions: Vec<String>,
) -> Result<ChangeStream, WatchError> {
    let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
    let token = CancellationToken::new();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                for raw in convert_event(&event, &extensions) {
                    // blocking_send is fine here; the callback runs on the
                    // backend's own thread
                    if tx.blocking_send(raw).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watcher backend error"),
        }
    })
    .map_err(|e| WatchError::Initialization(e.to_string()))?;

    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .map_err(|e| WatchError::Initialization(e.to_string()))?;

    debug!(dir = %dir.display(), "Filesystem watcher armed");

    // The keeper task owns the backend. Cancelling the token drops it,
    // which releases the callback and with it the channel sender.
    let keeper_token = token.clone();
    tokio::spawn(async move {
        keeper_token.cancelled().await;
        drop(watcher);
        debug!(dir = %dir.display(), "Filesystem watcher stopped");
    });

    Ok(ChangeStream::new(rx, token))
}

/// Map one notify event onto zero or more raw change events.
///
/// Renames split into a delete of the old path and a create of the new
/// one. Access events and events for non-matching extensions are dropped.
fn convert_event(event: &Event, extensions: &[String]) -> Vec<RawChangeEvent> {
    let changes: Vec<(PathBuf, ChangeKind)> = match &event.kind {
        EventKind::Create(_) => paths_with(event, ChangeKind::Created),
        EventKind::Remove(_) => paths_with(event, ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths_with(event, ChangeKind::Deleted)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths_with(event, ChangeKind::Created)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Old path first, new path second
            let old = event.paths.first().cloned();
            let new = event.paths.get(1).cloned();
            old.map(|p| (p, ChangeKind::Deleted))
                .into_iter()
                .chain(new.map(|p| (p, ChangeKind::Created)))
                .collect()
        }
        EventKind::Modify(_) => paths_with(event, ChangeKind::Modified),
        _ => Vec::new(),
    };

    changes
        .into_iter()
        .filter(|(path, _)| matches_extension(path, extensions))
        .map(|(path, kind)| RawChangeEvent::new(Locator::Path(path), kind))
        .collect()
}

fn paths_with(event: &Event, kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    event.paths.iter().cloned().map(|p| (p, kind)).collect()
}
