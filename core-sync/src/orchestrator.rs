//! # Sync Orchestrator
//!
//! Drives complete synchronization runs against registered sources.
//!
//! ## Overview
//!
//! One orchestrator owns the whole engine surface: sources are registered
//! under their [`SourceId`], full or subtree syncs start with
//! [`SyncOrchestrator::start_sync`], watch batches enter through
//! [`SyncOrchestrator::start_incremental`], and observers follow along via
//! [`SyncOrchestrator::subscribe`].
//!
//! A run walks the phases enumerate → extract → reconcile → persist. At most
//! one run is active; starting a new one supersedes the old by cancelling
//! its token and bumping the active generation, so a superseded run can
//! neither publish status nor apply its results, even if it races ahead.
//!
//! ## Concurrency
//!
//! Extraction fans out over a `JoinSet` gated by a `Semaphore`; each task is
//! bounded by a per-item timeout so one wedged item cannot stall the run.
//! Cancellation is cooperative: the token is consulted between enumeration
//! entries, around each extraction task, before reconciliation, and before
//! every commit attempt, never inside the store transaction. Commit failures
//! retry with exponential backoff, except schema mismatches, which no retry
//! can fix.

use crate::reconciler::{build_change_set, diff_tracks, ReconcileScope};
use crate::watcher::run_watch_supervisor;
use crate::{
    Result, RunStats, SyncError, SyncRunId, SyncState, SyncStateReporter, SyncStatus,
};
use bridge_traits::{
    ChangeKind, ContentKind, EnumerationEntry, EnumerationStream, Locator, MediaSource,
    RawChangeEvent, ScopeKind, SourceId, SyncScope,
};
use core_library::{now_ms, SnapshotScope, SnapshotStore, TrackRecord};
use core_runtime::config::{
    DEFAULT_DEBOUNCE_WINDOW, DEFAULT_EXTRACTION_TIMEOUT, DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
    DEFAULT_MAX_PENDING_CHANGES, DEFAULT_PERSIST_RETRY_ATTEMPTS, DEFAULT_PERSIST_RETRY_BASE_DELAY,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Debounced batches waiting for the trigger task.
const WATCH_TRIGGER_CAPACITY: usize = 8;

// ============================================================================
// Settings
// ============================================================================

/// Tuning knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Extraction worker pool size
    pub max_concurrent_extractions: usize,

    /// Hard limit per extraction; items over it count as failed
    pub extraction_timeout: Duration,

    /// Quiet period a change burst must observe before triggering a run
    pub debounce_window: Duration,

    /// Pending change cap; reaching it triggers without waiting for quiet
    pub max_pending_changes: usize,

    /// Total commit attempts before a run fails on persistence
    pub persist_retry_attempts: u32,

    /// First retry delay; doubles per attempt
    pub persist_retry_base_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            max_pending_changes: DEFAULT_MAX_PENDING_CHANGES,
            persist_retry_attempts: DEFAULT_PERSIST_RETRY_ATTEMPTS,
            persist_retry_base_delay: DEFAULT_PERSIST_RETRY_BASE_DELAY,
        }
    }
}

// ============================================================================
// Internal run bookkeeping
// ============================================================================

/// The currently active run, if any
struct ActiveRun {
    run_id: SyncRunId,
    generation: u64,
    token: CancellationToken,
}

/// A running watch pipeline for one source
struct WatchHandle {
    cancel: CancellationToken,
}

/// Everything a run task needs, fixed at start
struct RunContext {
    run_id: SyncRunId,
    generation: u64,
    token: CancellationToken,
    source: Arc<dyn MediaSource>,
    scope: SyncScope,
    reconcile_scope: ReconcileScope,
    started: Instant,
}

/// Mutable per-run status the task accumulates
struct RunTracker {
    run_id: SyncRunId,
    source_id: SourceId,
    state: SyncState,
    progress: crate::SyncProgress,
    errors: Vec<SyncError>,
}

impl RunTracker {
    fn new(run_id: SyncRunId, source_id: SourceId) -> Self {
        Self {
            run_id,
            source_id,
            state: SyncState::Enumerating,
            progress: crate::SyncProgress::new(),
            errors: Vec::new(),
        }
    }

    fn advance(&mut self, to: SyncState) -> Result<()> {
        self.state = self.state.transition_to(to)?;
        Ok(())
    }

    fn record_error(&mut self, error: SyncError) {
        self.errors.push(error);
    }

    fn status(&self, stats: Option<RunStats>) -> SyncStatus {
        SyncStatus {
            run_id: Some(self.run_id),
            source_id: Some(self.source_id.clone()),
            state: self.state,
            progress: self.progress.clone(),
            errors: self.errors.clone(),
            stats,
        }
    }
}

/// Where the run's locators come from
enum RunInput {
    /// Enumerate the context's scope
    FullEnumeration,
    /// A debounced change batch declared the locators directly
    ChangeBatch(Vec<RawChangeEvent>),
}

/// How a run ended
enum RunEnd {
    Completed(RunStats),
    Cancelled,
    Failed(SyncError),
}

/// Result of one extraction task
enum ExtractOutcome {
    Extracted { record: TrackRecord, kind: ContentKind },
    Failed { kind: ContentKind, error: SyncError },
    Cancelled,
}

fn collect_outcome(
    tracker: &mut RunTracker,
    fresh: &mut Vec<TrackRecord>,
    joined: std::result::Result<ExtractOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(ExtractOutcome::Extracted { record, kind }) => {
            tracker.progress.record_extracted(kind);
            fresh.push(record);
        }
        Ok(ExtractOutcome::Failed { kind, error }) => {
            warn!(run_id = %tracker.run_id, error = %error, "extraction failed");
            tracker.progress.record_failed(kind);
            tracker.record_error(error);
        }
        Ok(ExtractOutcome::Cancelled) => {}
        Err(join_error) => {
            warn!(
                run_id = %tracker.run_id,
                error = %join_error,
                "extraction task did not complete"
            );
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The synchronization engine's command surface.
pub struct SyncOrchestrator {
    settings: SyncSettings,

    /// The one shared mutable resource; all writes go through `apply`
    store: Arc<dyn SnapshotStore>,

    /// Registered sources by id
    sources: Arc<RwLock<HashMap<SourceId, Arc<dyn MediaSource>>>>,

    /// Status publication
    reporter: Arc<SyncStateReporter>,

    /// At most one run owns this slot; replacing it supersedes the owner
    active: Arc<Mutex<Option<ActiveRun>>>,

    /// Monotonic generation counter backing the supersede guard
    next_generation: Arc<AtomicU64>,

    /// Running watch pipelines by source
    watchers: Arc<Mutex<HashMap<SourceId, WatchHandle>>>,

    /// Root token; every run and watcher token is a child of it
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator over a snapshot store.
    pub fn new(settings: SyncSettings, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            settings,
            store,
            sources: Arc::new(RwLock::new(HashMap::new())),
            reporter: Arc::new(SyncStateReporter::new()),
            active: Arc::new(Mutex::new(None)),
            next_generation: Arc::new(AtomicU64::new(0)),
            watchers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            store: Arc::clone(&self.store),
            sources: Arc::clone(&self.sources),
            reporter: Arc::clone(&self.reporter),
            active: Arc::clone(&self.active),
            next_generation: Arc::clone(&self.next_generation),
            watchers: Arc::clone(&self.watchers),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Register a source. Replaces any prior source with the same id.
    pub async fn register_source(&self, source: Arc<dyn MediaSource>) {
        let id = source.id().clone();
        self.sources.write().await.insert(id.clone(), source);
        info!(source_id = %id, "source registered");
    }

    /// Subscribe to status updates; the current status is available
    /// immediately.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.reporter.subscribe()
    }

    /// The engine status as of now.
    pub fn current_status(&self) -> SyncStatus {
        self.reporter.current()
    }

    /// Start a full or subtree synchronization.
    ///
    /// Returns the new run's id immediately; the run proceeds in the
    /// background. Any in-flight run is superseded: its token is cancelled
    /// and its results can no longer be applied or published.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownSource`] when no source is registered
    /// under the scope's id.
    #[instrument(skip(self), fields(source_id = %scope.source_id))]
    pub async fn start_sync(&self, scope: SyncScope) -> Result<SyncRunId> {
        let source = self.source(&scope.source_id).await?;
        let reconcile_scope = match &scope.kind {
            ScopeKind::Full => ReconcileScope::Full,
            ScopeKind::Subtree(root) => ReconcileScope::Subtree(root.clone()),
        };

        let ctx = self.begin_run(source, scope, reconcile_scope).await;
        let run_id = ctx.run_id;

        let engine = self.clone_for_task();
        tokio::spawn(async move {
            engine.execute_run(ctx, RunInput::FullEnumeration).await;
        });

        info!(run_id = %run_id, "sync started");
        Ok(run_id)
    }

    /// Start an incremental run from a debounced change batch.
    ///
    /// Extraction covers the created/modified locators; deletion inference
    /// is confined to exactly the locators the batch names, so tracks the
    /// batch never mentioned are untouchable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EmptyChangeBatch`] for an empty batch (there is
    /// nothing to do, and superseding a real run over nothing would lose
    /// work) and [`SyncError::UnknownSource`] for an unregistered id.
    #[instrument(skip(self, events), fields(source_id = %source_id, events = events.len()))]
    pub async fn start_incremental(
        &self,
        source_id: &SourceId,
        events: Vec<RawChangeEvent>,
    ) -> Result<SyncRunId> {
        if events.is_empty() {
            return Err(SyncError::EmptyChangeBatch);
        }
        let source = self.source(source_id).await?;

        let declared: HashSet<String> = events
            .iter()
            .map(|event| event.locator.as_key())
            .collect();
        let ctx = self
            .begin_run(
                source,
                SyncScope::full(source_id.clone()),
                ReconcileScope::Locators(declared),
            )
            .await;
        let run_id = ctx.run_id;

        let engine = self.clone_for_task();
        tokio::spawn(async move {
            engine.execute_run(ctx, RunInput::ChangeBatch(events)).await;
        });

        info!(run_id = %run_id, "incremental sync started");
        Ok(run_id)
    }

    /// Cancel the active run, if any. Returns whether one was cancelled.
    ///
    /// Cancellation is cooperative: the status flips to `Cancelling` right
    /// away and settles to `Idle` once the run task reaches its next
    /// checkpoint. Work already committed stays committed.
    #[instrument(skip(self))]
    pub async fn cancel(&self) -> bool {
        let active = self.active.lock().await;
        match *active {
            Some(ref run) => {
                info!(run_id = %run.run_id, "cancelling sync");
                run.token.cancel();
                let mut status = self.reporter.current();
                if status.state.can_transition_to(SyncState::Cancelling) {
                    status.state = SyncState::Cancelling;
                    self.reporter.publish(status);
                }
                true
            }
            None => false,
        }
    }

    /// Start watching a source, triggering incremental runs on change.
    ///
    /// Idempotent: a source already being watched is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownSource`] for an unregistered id and
    /// [`SyncError::Watch`] when the source cannot deliver change events.
    #[instrument(skip(self), fields(source_id = %source_id))]
    pub async fn start_watching(&self, source_id: &SourceId) -> Result<()> {
        let source = self.source(source_id).await?;
        if !source.supports_watch() {
            return Err(SyncError::Watch {
                source_id: source_id.as_str().to_string(),
                message: "source does not support change notifications".to_string(),
            });
        }

        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(source_id) {
            debug!(source_id = %source_id, "already watching");
            return Ok(());
        }

        let cancel = self.shutdown.child_token();
        let (batches_tx, mut batches_rx) = mpsc::channel(WATCH_TRIGGER_CAPACITY);

        tokio::spawn(run_watch_supervisor(
            source,
            SyncScope::full(source_id.clone()),
            self.settings.debounce_window,
            self.settings.max_pending_changes,
            batches_tx,
            Arc::clone(&self.reporter),
            cancel.clone(),
        ));

        let engine = self.clone_for_task();
        let trigger_source = source_id.clone();
        let trigger_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = trigger_cancel.cancelled() => return,
                    batch = batches_rx.recv() => match batch {
                        Some(batch) => batch,
                        None => return,
                    },
                };
                if let Err(err) = engine.start_incremental(&trigger_source, batch).await {
                    warn!(
                        source_id = %trigger_source,
                        error = %err,
                        "debounced batch could not start a run"
                    );
                }
            }
        });

        watchers.insert(source_id.clone(), WatchHandle { cancel });
        info!(source_id = %source_id, "watch started");
        Ok(())
    }

    /// Stop watching a source. A source not being watched is a no-op.
    #[instrument(skip(self), fields(source_id = %source_id))]
    pub async fn stop_watching(&self, source_id: &SourceId) {
        if let Some(handle) = self.watchers.lock().await.remove(source_id) {
            handle.cancel.cancel();
            info!(source_id = %source_id, "watch stopped");
        }
    }

    /// Cancel everything: the active run and all watchers.
    pub async fn shutdown(&self) {
        info!("sync engine shutting down");
        self.shutdown.cancel();
        self.watchers.lock().await.clear();
    }

    async fn source(&self, id: &SourceId) -> Result<Arc<dyn MediaSource>> {
        self.sources
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownSource(id.as_str().to_string()))
    }

    /// Claim the active slot for a new run and make it visible.
    ///
    /// Superseding the previous owner and publishing the new run's first
    /// status happen under one lock, so observers never see the old run
    /// again once this returns.
    async fn begin_run(
        &self,
        source: Arc<dyn MediaSource>,
        scope: SyncScope,
        reconcile_scope: ReconcileScope,
    ) -> RunContext {
        let run_id = SyncRunId::new();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.shutdown.child_token();

        {
            let mut active = self.active.lock().await;
            if let Some(prior) = active.take() {
                info!(
                    superseded = %prior.run_id,
                    replacement = %run_id,
                    "superseding active run"
                );
                prior.token.cancel();
            }
            *active = Some(ActiveRun {
                run_id,
                generation,
                token: token.clone(),
            });

            let mut status = SyncStatus::idle();
            status.run_id = Some(run_id);
            status.source_id = Some(scope.source_id.clone());
            status.state = SyncState::Enumerating;
            self.reporter.publish(status);
        }

        RunContext {
            run_id,
            generation,
            token,
            source,
            scope,
            reconcile_scope,
            started: Instant::now(),
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        matches!(*self.active.lock().await, Some(ref run) if run.generation == generation)
    }

    /// Publish a status unless the run has been superseded.
    async fn publish_if_current(&self, generation: u64, status: SyncStatus) {
        let active = self.active.lock().await;
        if matches!(*active, Some(ref run) if run.generation == generation) {
            self.reporter.publish(status);
        }
    }

    async fn publish_progress(&self, ctx: &RunContext, tracker: &RunTracker) {
        self.publish_if_current(ctx.generation, tracker.status(None))
            .await;
    }

    async fn maybe_publish_extraction(&self, ctx: &RunContext, tracker: &RunTracker) {
        let processed = tracker.progress.extracted_total() + tracker.progress.failed_total();
        if processed > 0 && processed.is_multiple_of(10) {
            self.publish_progress(ctx, tracker).await;
        }
    }

    // ------------------------------------------------------------------
    // The run pipeline
    // ------------------------------------------------------------------

    #[instrument(skip(self, ctx, input), fields(run_id = %ctx.run_id))]
    async fn execute_run(&self, ctx: RunContext, input: RunInput) {
        let mut tracker = RunTracker::new(ctx.run_id, ctx.scope.source_id.clone());
        let end = self.run_pipeline(&ctx, &mut tracker, input).await;
        self.finish_run(&ctx, tracker, end).await;
    }

    async fn run_pipeline(
        &self,
        ctx: &RunContext,
        tracker: &mut RunTracker,
        input: RunInput,
    ) -> RunEnd {
        // Phase 1: collect the locators this run examines.
        let locators = match input {
            RunInput::FullEnumeration => {
                let stream = match ctx.source.enumerate(&ctx.scope).await {
                    Ok(stream) => stream,
                    Err(error) => return RunEnd::Failed(error.into()),
                };
                match self.drain_enumeration(ctx, tracker, stream).await {
                    Ok(locators) => locators,
                    Err(end) => return end,
                }
            }
            RunInput::ChangeBatch(events) => {
                let mut seen = HashSet::new();
                let locators: Vec<Locator> = events
                    .iter()
                    .filter(|event| event.kind != ChangeKind::Deleted)
                    .filter(|event| seen.insert(event.locator.as_key()))
                    .map(|event| event.locator.clone())
                    .collect();
                for locator in &locators {
                    tracker
                        .progress
                        .record_discovered(ContentKind::from_locator(locator));
                }
                locators
            }
        };

        // Phase 2: extraction.
        if let Err(error) = tracker.advance(SyncState::Extracting) {
            return RunEnd::Failed(error);
        }
        self.publish_progress(ctx, tracker).await;

        let examined: Vec<String> = locators.iter().map(|locator| locator.as_key()).collect();
        let fresh = match self.extract_all(ctx, tracker, locators).await {
            Ok(fresh) => fresh,
            Err(end) => return end,
        };

        // Anything examined that yielded no record is in an unknown state:
        // never infer a deletion from it.
        let fresh_keys: HashSet<&str> = fresh.iter().map(|r| r.locator.as_str()).collect();
        let failed_locators: HashSet<String> = examined
            .into_iter()
            .filter(|key| !fresh_keys.contains(key.as_str()))
            .collect();

        // Phases 3 and 4: reconcile, then persist.
        self.reconcile_and_persist(ctx, tracker, fresh, failed_locators)
            .await
    }

    async fn drain_enumeration(
        &self,
        ctx: &RunContext,
        tracker: &mut RunTracker,
        mut stream: EnumerationStream,
    ) -> std::result::Result<Vec<Locator>, RunEnd> {
        let mut locators = Vec::new();
        loop {
            let entry = tokio::select! {
                _ = ctx.token.cancelled() => return Err(RunEnd::Cancelled),
                entry = stream.next() => entry,
            };
            let Some(entry) = entry else { break };

            match entry {
                EnumerationEntry::Item(locator) => {
                    tracker
                        .progress
                        .record_discovered(ContentKind::from_locator(&locator));
                    locators.push(locator);
                    if locators.len().is_multiple_of(100) {
                        self.publish_progress(ctx, tracker).await;
                    }
                }
                EnumerationEntry::Warning(warning) => {
                    warn!(
                        run_id = %ctx.run_id,
                        locator = ?warning.locator,
                        "enumeration skipped an entry: {}",
                        warning.message
                    );
                    tracker.record_error(warning.into());
                }
                EnumerationEntry::Failed(err) => {
                    // The listing is incomplete; nothing downstream may
                    // treat it as the full picture.
                    return Err(RunEnd::Failed(err.into()));
                }
            }
        }
        debug!(run_id = %ctx.run_id, discovered = locators.len(), "enumeration complete");
        Ok(locators)
    }

    async fn extract_all(
        &self,
        ctx: &RunContext,
        tracker: &mut RunTracker,
        locators: Vec<Locator>,
    ) -> std::result::Result<Vec<TrackRecord>, RunEnd> {
        let mut fresh = Vec::with_capacity(locators.len());
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_extractions.max(1)));
        let mut tasks: JoinSet<ExtractOutcome> = JoinSet::new();
        let now = now_ms();

        for locator in locators {
            let permit = tokio::select! {
                _ = ctx.token.cancelled() => {
                    tasks.shutdown().await;
                    return Err(RunEnd::Cancelled);
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let source = Arc::clone(&ctx.source);
            let source_id = ctx.scope.source_id.clone();
            let token = ctx.token.clone();
            let timeout = self.settings.extraction_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                if token.is_cancelled() {
                    return ExtractOutcome::Cancelled;
                }
                let kind = ContentKind::from_locator(&locator);
                match tokio::time::timeout(timeout, source.extract(&locator)).await {
                    Ok(Ok(extracted)) => ExtractOutcome::Extracted {
                        record: TrackRecord::from_extracted(&source_id, &extracted, now),
                        kind,
                    },
                    Ok(Err(error)) => ExtractOutcome::Failed {
                        kind,
                        error: error.into(),
                    },
                    Err(_) => ExtractOutcome::Failed {
                        kind,
                        error: SyncError::Extraction {
                            locator: locator.as_key(),
                            message: format!("timed out after {}ms", timeout.as_millis()),
                        },
                    },
                }
            });

            // Fold in whatever already finished so results never pile up.
            while let Some(joined) = tasks.try_join_next() {
                collect_outcome(tracker, &mut fresh, joined);
                self.maybe_publish_extraction(ctx, tracker).await;
            }
        }

        loop {
            let joined = tokio::select! {
                _ = ctx.token.cancelled() => {
                    tasks.shutdown().await;
                    return Err(RunEnd::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(joined) => joined,
                    None => break,
                },
            };
            collect_outcome(tracker, &mut fresh, joined);
            self.maybe_publish_extraction(ctx, tracker).await;
        }

        debug!(
            run_id = %ctx.run_id,
            extracted = fresh.len(),
            failed = tracker.progress.failed_total(),
            "extraction complete"
        );
        Ok(fresh)
    }

    async fn reconcile_and_persist(
        &self,
        ctx: &RunContext,
        tracker: &mut RunTracker,
        fresh: Vec<TrackRecord>,
        failed_locators: HashSet<String>,
    ) -> RunEnd {
        if let Err(error) = tracker.advance(SyncState::Reconciling) {
            return RunEnd::Failed(error);
        }
        self.publish_progress(ctx, tracker).await;
        if ctx.token.is_cancelled() {
            return RunEnd::Cancelled;
        }

        let source_scope = SnapshotScope::source(ctx.scope.source_id.clone());
        let existing = match self.store.read_fingerprints(&source_scope).await {
            Ok(existing) => existing,
            Err(error) => return RunEnd::Failed(error.into()),
        };

        let diff = diff_tracks(&existing, fresh, &ctx.reconcile_scope, &failed_locators);
        if diff.is_empty() {
            info!(run_id = %ctx.run_id, "no changes detected");
            return RunEnd::Completed(RunStats {
                items_failed: tracker.progress.failed_total(),
                ..RunStats::default()
            });
        }

        // Groups span sources, so the recomputation needs the whole
        // snapshot, not just this source's slice.
        let all_tracks = match self.store.read_tracks(&SnapshotScope::all()).await {
            Ok(tracks) => tracks,
            Err(error) => return RunEnd::Failed(error.into()),
        };
        let existing_groups = match self.store.read_groups().await {
            Ok(groups) => groups,
            Err(error) => return RunEnd::Failed(error.into()),
        };

        let change_set = build_change_set(diff, &all_tracks, &existing_groups, now_ms());
        let stats = RunStats {
            tracks_inserted: change_set.inserts.len() as u64,
            tracks_updated: change_set.updates.len() as u64,
            tracks_deleted: change_set.deletes.len() as u64,
            items_failed: tracker.progress.failed_total(),
        };

        if change_set.is_empty() {
            return RunEnd::Completed(stats);
        }

        if let Err(error) = tracker.advance(SyncState::Persisting) {
            return RunEnd::Failed(error);
        }
        self.publish_progress(ctx, tracker).await;

        let mut attempt = 1u32;
        loop {
            if ctx.token.is_cancelled() {
                return RunEnd::Cancelled;
            }
            if !self.is_current(ctx.generation).await {
                info!(run_id = %ctx.run_id, "superseded before apply, results discarded");
                return RunEnd::Cancelled;
            }

            match self.store.apply(&change_set).await {
                Ok(()) => {
                    info!(
                        run_id = %ctx.run_id,
                        inserted = stats.tracks_inserted,
                        updated = stats.tracks_updated,
                        deleted = stats.tracks_deleted,
                        "change set applied"
                    );
                    return RunEnd::Completed(stats);
                }
                Err(err)
                    if err.is_retryable() && attempt < self.settings.persist_retry_attempts =>
                {
                    let delay = self
                        .settings
                        .persist_retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        run_id = %ctx.run_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "apply failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.token.cancelled() => return RunEnd::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return RunEnd::Failed(err.into()),
            }
        }
    }

    /// Publish the terminal status and release the active slot, atomically
    /// with respect to new runs claiming it.
    async fn finish_run(&self, ctx: &RunContext, mut tracker: RunTracker, end: RunEnd) {
        let elapsed_ms = ctx.started.elapsed().as_millis() as u64;

        let mut active = self.active.lock().await;
        let is_current =
            matches!(*active, Some(ref run) if run.generation == ctx.generation);
        if !is_current {
            debug!(run_id = %ctx.run_id, "superseded run finished, outcome discarded");
            return;
        }

        match end {
            RunEnd::Completed(stats) => {
                tracker.state = SyncState::Completed;
                if tracker.errors.is_empty() {
                    info!(
                        run_id = %ctx.run_id,
                        elapsed_ms,
                        changed = stats.total_changed(),
                        "sync completed"
                    );
                } else {
                    info!(
                        run_id = %ctx.run_id,
                        elapsed_ms,
                        changed = stats.total_changed(),
                        errors = tracker.errors.len(),
                        "sync completed with errors"
                    );
                }
                self.reporter.publish(tracker.status(Some(stats)));
            }
            RunEnd::Failed(fatal) => {
                error!(run_id = %ctx.run_id, elapsed_ms, error = %fatal, "sync failed");
                tracker.record_error(fatal);
                tracker.state = SyncState::Failed;
                self.reporter.publish(tracker.status(None));
            }
            RunEnd::Cancelled => {
                info!(run_id = %ctx.run_id, elapsed_ms, "sync cancelled");
                tracker.state = SyncState::Cancelling;
                self.reporter.publish(tracker.status(None));
                self.reporter.publish(SyncStatus::idle());
            }
        }

        *active = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
