//! # Watch Supervision
//!
//! Long-lived tasks that turn raw change streams into debounced batches.
//!
//! ## Overview
//!
//! Two layers per watched source:
//!
//! - The **pump** ([`run_watch_pump`]) owns one [`ChangeStream`] and a
//!   [`ChangeDebouncer`]. Every raw event resets a quiet-window timer; a
//!   batch is dispatched when the window elapses without further events, or
//!   immediately when the pending cap is hit. Dispatch goes over a channel
//!   to the orchestrator, which runs one incremental sync per batch.
//! - The **supervisor** ([`run_watch_supervisor`]) opens the stream, runs
//!   the pump, and when the stream dies reopens it after an exponential
//!   backoff instead of letting watching silently stop. The backoff resets
//!   once a stream survives a healthy period. A source that reports
//!   [`WatchError::Unsupported`] is not retried.
//!
//! Both layers stop cooperatively through a [`CancellationToken`].

use crate::debounce::ChangeDebouncer;
use crate::{SyncError, SyncStateReporter};
use bridge_traits::{ChangeStream, MediaSource, RawChangeEvent, SyncScope, WatchError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// First restart delay after a stream failure.
const RESTART_BASE_DELAY: Duration = Duration::from_secs(1);
/// Restart delays stop growing here.
const RESTART_MAX_DELAY: Duration = Duration::from_secs(60);
/// A stream that lived this long counts as healthy and resets the backoff.
const HEALTHY_STREAM_PERIOD: Duration = Duration::from_secs(60);

// ============================================================================
// Pump
// ============================================================================

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The batch consumer dropped its receiver.
    ConsumerGone,
    /// The change stream ended on its own; the supervisor may reopen it.
    StreamEnded,
}

/// Drive one change stream through the debouncer until it ends.
///
/// Pending events still waiting out their quiet window are flushed when the
/// stream ends and discarded on cancellation; a cancelled engine is shutting
/// down and the next full sync re-observes anything dropped here.
pub(crate) async fn run_watch_pump(
    mut stream: ChangeStream,
    window: Duration,
    max_pending: usize,
    batches: mpsc::Sender<Vec<RawChangeEvent>>,
    cancel: CancellationToken,
) -> PumpEnd {
    let mut debouncer = ChangeDebouncer::new(max_pending);
    let quiet = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                stream.stop();
                return PumpEnd::Cancelled;
            }
            maybe_event = stream.next() => match maybe_event {
                Some(event) => {
                    debug!(locator = %event.locator, kind = event.kind.as_str(), "change event");
                    if let Some(batch) = debouncer.record(event) {
                        // Cap reached: dispatch without waiting for quiet.
                        if batches.send(batch).await.is_err() {
                            return PumpEnd::ConsumerGone;
                        }
                    }
                    quiet.as_mut().reset(Instant::now() + window);
                }
                None => {
                    let batch = debouncer.flush();
                    if !batch.is_empty() && batches.send(batch).await.is_err() {
                        return PumpEnd::ConsumerGone;
                    }
                    return PumpEnd::StreamEnded;
                }
            },
            _ = &mut quiet, if !debouncer.is_empty() => {
                let batch = debouncer.flush();
                if batches.send(batch).await.is_err() {
                    return PumpEnd::ConsumerGone;
                }
            }
        }
    }
}

// ============================================================================
// Restart backoff
// ============================================================================

/// Doubling delay sequence with a cap, reset after healthy periods.
#[derive(Debug)]
pub(crate) struct RestartBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl RestartBackoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Delay before the next restart attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Watch one source until cancelled, reopening the stream on failure.
///
/// Errors are surfaced through the reporter so a repeatedly dying watcher is
/// visible to observers rather than a silent gap in change delivery.
pub(crate) async fn run_watch_supervisor(
    source: Arc<dyn MediaSource>,
    scope: SyncScope,
    window: Duration,
    max_pending: usize,
    batches: mpsc::Sender<Vec<RawChangeEvent>>,
    reporter: Arc<SyncStateReporter>,
    cancel: CancellationToken,
) {
    let source_id = source.id().clone();
    let mut backoff = RestartBackoff::new(RESTART_BASE_DELAY, RESTART_MAX_DELAY);

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = source.watch(&scope) => opened,
        };

        match opened {
            Ok(stream) => {
                info!(source_id = %source_id, "watching source");
                let started = Instant::now();
                match run_watch_pump(
                    stream,
                    window,
                    max_pending,
                    batches.clone(),
                    cancel.clone(),
                )
                .await
                {
                    PumpEnd::Cancelled | PumpEnd::ConsumerGone => return,
                    PumpEnd::StreamEnded => {
                        if started.elapsed() >= HEALTHY_STREAM_PERIOD {
                            backoff.reset();
                        }
                        warn!(source_id = %source_id, "change stream ended, will reopen");
                        reporter.record_error(SyncError::Watch {
                            source_id: source_id.as_str().to_string(),
                            message: "change stream ended unexpectedly".to_string(),
                        });
                    }
                }
            }
            Err(WatchError::Unsupported) => {
                warn!(source_id = %source_id, "source does not support watching");
                reporter.record_error(SyncError::watch(
                    source_id.as_str(),
                    &WatchError::Unsupported,
                ));
                return;
            }
            Err(error) => {
                warn!(source_id = %source_id, error = %error, "failed to open change stream");
                reporter.record_error(SyncError::watch(source_id.as_str(), &error));
            }
        }

        let delay = backoff.next_delay();
        debug!(
            source_id = %source_id,
            delay_ms = delay.as_millis() as u64,
            "watcher restart backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        ChangeKind, EnumerationStream, ExtractedTrack, ExtractionError, Locator, SourceError,
        SourceId, SourceKind,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_millis(500);

    fn event(path: &str, kind: ChangeKind) -> RawChangeEvent {
        RawChangeEvent::new(Locator::Path(PathBuf::from(path)), kind)
    }

    fn test_stream(capacity: usize) -> (mpsc::Sender<RawChangeEvent>, ChangeStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChangeStream::new(rx, CancellationToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_writes_produces_one_batch() {
        let (events_tx, stream) = test_stream(64);
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tokio::spawn(run_watch_pump(
            stream,
            WINDOW,
            4096,
            batches_tx,
            cancel.clone(),
        ));

        for _ in 0..20 {
            events_tx
                .send(event("/m/a.mp3", ChangeKind::Modified))
                .await
                .unwrap();
        }

        let batch = batches_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Modified);

        // No further trigger for the same burst.
        let silence =
            tokio::time::timeout(Duration::from_secs(5), batches_rx.recv()).await;
        assert!(silence.is_err());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_separated_by_quiet_produce_separate_batches() {
        let (events_tx, stream) = test_stream(8);
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tokio::spawn(run_watch_pump(
            stream,
            WINDOW,
            4096,
            batches_tx,
            cancel.clone(),
        ));

        events_tx
            .send(event("/m/a.mp3", ChangeKind::Modified))
            .await
            .unwrap();
        let first = batches_rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        events_tx
            .send(event("/m/b.mp3", ChangeKind::Created))
            .await
            .unwrap();
        let second = batches_rx.recv().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, ChangeKind::Created);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_cap_flushes_without_quiet() {
        let (events_tx, stream) = test_stream(8);
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tokio::spawn(run_watch_pump(stream, WINDOW, 3, batches_tx, cancel.clone()));

        for path in ["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"] {
            events_tx.send(event(path, ChangeKind::Created)).await.unwrap();
        }

        let batch = batches_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 3);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_flushes_remainder() {
        let (events_tx, stream) = test_stream(8);
        let (batches_tx, mut batches_rx) = mpsc::channel(8);

        let pump = tokio::spawn(run_watch_pump(
            stream,
            WINDOW,
            4096,
            batches_tx,
            CancellationToken::new(),
        ));

        events_tx
            .send(event("/m/a.mp3", ChangeKind::Created))
            .await
            .unwrap();
        events_tx
            .send(event("/m/b.mp3", ChangeKind::Created))
            .await
            .unwrap();
        drop(events_tx);

        let batch = batches_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(pump.await.unwrap(), PumpEnd::StreamEnded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending() {
        let (events_tx, stream) = test_stream(8);
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(run_watch_pump(
            stream,
            WINDOW,
            4096,
            batches_tx,
            cancel.clone(),
        ));

        events_tx
            .send(event("/m/a.mp3", ChangeKind::Modified))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(pump.await.unwrap(), PumpEnd::Cancelled);
        assert!(batches_rx.recv().await.is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff =
            RestartBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_resets() {
        let mut backoff =
            RestartBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    /// Source whose change stream ends immediately, n times in a row.
    struct FlakyWatchSource {
        id: SourceId,
        watch_calls: AtomicUsize,
    }

    impl FlakyWatchSource {
        fn new() -> Self {
            Self {
                id: SourceId::new("flaky"),
                watch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaSource for FlakyWatchSource {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn kind(&self) -> SourceKind {
            SourceKind::LocalFilesystem
        }

        async fn enumerate(
            &self,
            _scope: &SyncScope,
        ) -> std::result::Result<EnumerationStream, SourceError> {
            Err(SourceError::Backend("not used in this test".to_string()))
        }

        async fn extract(
            &self,
            locator: &Locator,
        ) -> std::result::Result<ExtractedTrack, ExtractionError> {
            Err(ExtractionError::UnreadableSource {
                locator: locator.as_key(),
                message: "not used in this test".to_string(),
            })
        }

        fn supports_watch(&self) -> bool {
            true
        }

        async fn watch(
            &self,
            _scope: &SyncScope,
        ) -> std::result::Result<ChangeStream, WatchError> {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            // Sender dropped right away: the stream ends on first poll.
            let (_, rx) = mpsc::channel(1);
            Ok(ChangeStream::new(rx, CancellationToken::new()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_reopens_dead_streams_with_backoff() {
        let source = Arc::new(FlakyWatchSource::new());
        let reporter = Arc::new(SyncStateReporter::new());
        let (batches_tx, _batches_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let supervisor = tokio::spawn(run_watch_supervisor(
            source.clone(),
            SyncScope::full(SourceId::new("flaky")),
            WINDOW,
            4096,
            batches_tx,
            reporter.clone(),
            cancel.clone(),
        ));

        while source.watch_calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        cancel.cancel();
        supervisor.await.unwrap();

        assert!(source.watch_calls.load(Ordering::SeqCst) >= 3);
        assert!(reporter.current().errors.len() >= 2);
    }

    /// Source that refuses to watch at all.
    struct DeafSource {
        id: SourceId,
    }

    #[async_trait]
    impl MediaSource for DeafSource {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn kind(&self) -> SourceKind {
            SourceKind::RemoteCatalog
        }

        async fn enumerate(
            &self,
            _scope: &SyncScope,
        ) -> std::result::Result<EnumerationStream, SourceError> {
            Err(SourceError::Backend("not used in this test".to_string()))
        }

        async fn extract(
            &self,
            locator: &Locator,
        ) -> std::result::Result<ExtractedTrack, ExtractionError> {
            Err(ExtractionError::UnreadableSource {
                locator: locator.as_key(),
                message: "not used in this test".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_stops_on_unsupported() {
        let reporter = Arc::new(SyncStateReporter::new());
        let (batches_tx, _batches_rx) = mpsc::channel(8);

        run_watch_supervisor(
            Arc::new(DeafSource {
                id: SourceId::new("deaf"),
            }),
            SyncScope::full(SourceId::new("deaf")),
            WINDOW,
            4096,
            batches_tx,
            reporter.clone(),
            CancellationToken::new(),
        )
        .await;

        let errors = reporter.current().errors;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SyncError::Watch { .. }));
    }
}
