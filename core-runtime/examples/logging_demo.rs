//! Logging configuration demonstration
//!
//! Shows the output of each log format and the filter hook.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run --example logging_demo
//!
//! # JSON format
//! cargo run --example logging_demo -- json
//!
//! # Compact format
//! cargo run --example logging_demo -- compact
//!
//! # With custom filter
//! cargo run --example logging_demo -- pretty "core_runtime=trace"
//! ```

use core_runtime::logging::{init_logging, strip_path, LogFormat, LogLevel, LoggingConfig};
use std::env;
use tracing::{debug, error, info, instrument, span, trace, warn, Level};

fn main() {
    let args: Vec<String> = env::args().collect();

    let format = if args.len() > 1 {
        match args[1].as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Pretty,
        }
    } else {
        LogFormat::default()
    };

    let filter = args.get(2).cloned();

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_spans(true)
        .with_target(true);

    if let Some(f) = filter {
        config = config.with_filter(f);
    }

    init_logging(config).expect("Failed to initialize logging");

    info!("=== Logging Demo ===");
    info!(format = ?format, "Logging initialized");

    demo_log_levels();
    demo_structured_logging();
    demo_spans();
    demo_path_privacy();
    demo_instrumentation();

    info!("=== Demo Complete ===");
}

fn demo_log_levels() {
    let span = span!(Level::INFO, "log_levels");
    let _enter = span.enter();

    trace!("This is a TRACE level log");
    debug!("This is a DEBUG level log");
    info!("This is an INFO level log");
    warn!("This is a WARN level log");
    error!("This is an ERROR level log");
}

fn demo_structured_logging() {
    let span = span!(Level::INFO, "structured_logging");
    let _enter = span.enter();

    info!("Simple message without fields");

    info!(
        source_id = "laptop",
        title = "Song Title",
        modified_at = 1_700_000_000_000i64,
        "Track information"
    );

    info!(
        discovered = 150,
        extracted = 148,
        failed = 2,
        "Run counters"
    );
}

fn demo_spans() {
    let span = span!(Level::INFO, "sync_run", source_id = "laptop");
    let _enter = span.enter();

    info!("Starting sync run");

    {
        let inner_span = span!(Level::DEBUG, "enumerate");
        let _inner = inner_span.enter();

        debug!(count = 150, "Enumerated items under the root");
    }

    {
        let inner_span = span!(Level::DEBUG, "extract");
        let _inner = inner_span.enter();

        debug!(processed = 50, total = 150, "Extracting metadata");
    }

    info!(tracks = 150, "Sync run completed");
}

fn demo_path_privacy() {
    let span = span!(Level::INFO, "path_privacy");
    let _enter = span.enter();

    // Full paths reveal the user's directory layout; log the file name only.
    let path = "/home/user/music/private/song.mp3";

    info!(file = %strip_path(path), "Extraction failed for one file");
}

#[instrument]
fn demo_instrumentation() {
    info!("Instrumented function automatically creates spans");

    let items = vec!["one.flac", "two.flac", "three.flac"];
    process_items(&items);
}

#[instrument(fields(count = items.len()))]
fn process_items(items: &[&str]) {
    debug!("Processing items");

    for (idx, item) in items.iter().enumerate() {
        process_item(idx, item);
    }

    info!("All items processed");
}

#[instrument(fields(item_id = idx))]
fn process_item(idx: usize, item: &str) {
    trace!(item = %item, "Processing individual item");
}
