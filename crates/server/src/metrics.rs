//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the invoicer server:
//! - HTTP request metrics (latency, counts, errors)
//! - WebSocket connection metrics
//! - Upload batch and reimbursement-set gauges (collected dynamically)
//! - Core pipeline metrics registered from `invoicer_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use regex_lite::Regex;

use invoicer_core::TransferState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "invoicer_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "invoicer_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "invoicer_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "invoicer_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("invoicer_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "invoicer_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Pipeline Gauges (collected dynamically)
// =============================================================================

/// Tasks of the current upload batch by status.
pub static UPLOAD_TASKS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "invoicer_upload_tasks_by_status",
            "Tasks of the current upload batch by status",
        ),
        &["status"],
    )
    .unwrap()
});

/// Reimbursement sets known to the aggregate.
pub static REIMBURSEMENT_SETS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "invoicer_reimbursement_sets",
        "Number of reimbursement sets in the aggregate",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Dynamic gauges
    registry
        .register(Box::new(UPLOAD_TASKS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(REIMBURSEMENT_SETS.clone()))
        .unwrap();

    // Core metrics (uploads, exports, events)
    for metric in invoicer_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the current batch and sets.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let mut counts = [
        ("pending", 0i64),
        ("in_progress", 0),
        ("succeeded", 0),
        ("duplicate", 0),
        ("failed", 0),
        ("cancelled", 0),
    ];
    let tasks = match state.uploads().current() {
        TransferState::InProgress(batch) => batch.tasks.clone(),
        TransferState::Completed(summary) => summary.per_task_results.clone(),
        TransferState::Idle => Vec::new(),
    };
    for task in &tasks {
        let status = task.status.status_type();
        if let Some(entry) = counts.iter_mut().find(|(name, _)| *name == status) {
            entry.1 += 1;
        }
    }
    for (status, count) in counts {
        UPLOAD_TASKS_BY_STATUS.with_label_values(&[status]).set(count);
    }

    REIMBURSEMENT_SETS.set(state.set_aggregate().sets().await.len() as i64);
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());
static ID_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/api/v1/(invoices|sets)/([^/]+)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    // Invoice and set ids are opaque strings chosen by the repository.
    let result = ID_SEGMENT.replace(&result, |caps: &regex_lite::Captures| {
        match &caps[2] {
            "delete" | "invoices" | "{id}" => caps[0].to_string(),
            _ => format!("/api/v1/{}/{{id}}", &caps[1]),
        }
    });
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/uploads/tasks/550e8400-e29b-41d4-a716-446655440000/retry";
        assert_eq!(normalize_path(path), "/api/v1/uploads/tasks/{id}/retry");
    }

    #[test]
    fn test_normalize_path_opaque_ids() {
        assert_eq!(normalize_path("/api/v1/invoices/inv-42"), "/api/v1/invoices/{id}");
        assert_eq!(
            normalize_path("/api/v1/sets/trip-2024/status"),
            "/api/v1/sets/{id}/status"
        );
    }

    #[test]
    fn test_normalize_path_keeps_collection_routes() {
        assert_eq!(normalize_path("/api/v1/invoices/delete"), "/api/v1/invoices/delete");
        assert_eq!(
            normalize_path("/api/v1/sets/invoices/remove"),
            "/api/v1/sets/invoices/remove"
        );
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/invoices/12345"), "/api/v1/invoices/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("invoicer_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        invoicer_core::metrics::UPLOAD_RETRIES.inc();
        invoicer_core::metrics::EVENTS_PUBLISHED
            .with_label_values(&["invoice_deleted"])
            .inc();
        WS_CONNECTIONS_TOTAL.inc();
        REIMBURSEMENT_SETS.set(0);

        let output = encode_metrics();
        assert!(output.contains("invoicer_upload_retries_total"));
        assert!(output.contains("invoicer_events_published_total"));
        assert!(output.contains("invoicer_ws_connections_total"));
        assert!(output.contains("invoicer_reimbursement_sets"));
    }
}
