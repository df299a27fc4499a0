//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Upload batches and tasks
//! - Export packaging and archive sizes
//! - The event bus and its subscribers

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Upload Metrics
// =============================================================================

/// Upload tasks settled, by result.
pub static UPLOAD_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_upload_tasks_total", "Upload tasks settled"),
        &["result"], // "succeeded", "duplicate", "failed", "cancelled"
    )
    .unwrap()
});

/// Upload batch runs completed, by result.
pub static UPLOAD_BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_upload_batches_total", "Upload batch runs completed"),
        &["result"], // "completed", "cancelled"
    )
    .unwrap()
});

/// Upload batch run duration in seconds.
pub static UPLOAD_BATCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "invoicer_upload_batch_duration_seconds",
            "Duration of an upload batch run",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["result"],
    )
    .unwrap()
});

/// Tasks re-dispatched by a user retry.
pub static UPLOAD_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("invoicer_upload_retries_total", "Upload tasks retried").unwrap()
});

// =============================================================================
// Export Metrics
// =============================================================================

/// Export files by outcome.
pub static EXPORT_FILES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_export_files_total", "Files processed by exports"),
        &["result"], // "packaged", "no_file", "download_failed"
    )
    .unwrap()
});

/// Size of produced archives in bytes.
pub static EXPORT_ARCHIVE_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("invoicer_export_archive_bytes", "Size of export archives")
            .buckets(prometheus::exponential_buckets(16_384.0, 4.0, 8).unwrap()),
        &[],
    )
    .unwrap()
});

/// Exports aborted by an archive encoding failure.
pub static EXPORT_PACKAGING_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "invoicer_export_packaging_failures_total",
        "Exports aborted while encoding the archive",
    )
    .unwrap()
});

// =============================================================================
// Event Bus Metrics
// =============================================================================

/// Events published by type.
pub static EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_events_published_total", "Domain events published"),
        &["event_type"],
    )
    .unwrap()
});

/// Handler invocations that returned an error or panicked.
pub static EVENT_HANDLER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "invoicer_event_handler_failures_total",
            "Event handler invocations that failed",
        ),
        &["handler"],
    )
    .unwrap()
});

/// Full reloads of the reimbursement-set aggregate.
pub static SET_RELOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "invoicer_set_reloads_total",
            "Reimbursement set aggregate reloads",
        ),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Upload
        Box::new(UPLOAD_TASKS.clone()),
        Box::new(UPLOAD_BATCHES.clone()),
        Box::new(UPLOAD_BATCH_DURATION.clone()),
        Box::new(UPLOAD_RETRIES.clone()),
        // Export
        Box::new(EXPORT_FILES.clone()),
        Box::new(EXPORT_ARCHIVE_BYTES.clone()),
        Box::new(EXPORT_PACKAGING_FAILURES.clone()),
        // Events
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(EVENT_HANDLER_FAILURES.clone()),
        Box::new(SET_RELOADS.clone()),
    ]
}
