//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `operation`: bounded by code (get_room, commit_join, ...)
//! - `from`/`to`: room and participant status names
//! - `event`/`outcome`: webhook event tags and `applied`/`ignored`/`error`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by
/// `GET /metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // HTTP request p95 < 200ms
        .set_buckets_for_metric(
            Matcher::Prefix("room_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // DB query p99 < 50ms
        .set_buckets_for_metric(
            Matcher::Prefix("room_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Media server calls are remote and slower
        .set_buckets_for_metric(
            Matcher::Prefix("room_media_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set media request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `room_http_requests_total`, `room_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("room_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Trailing segments allowed after `/api/v1/rooms/{id}`.
const ROOM_ACTIONS: &[&str] = &[
    "join",
    "leave",
    "start",
    "end",
    "cancel",
    "token",
    "transfer-host",
    "participants",
    "invitations",
];

/// Normalize an endpoint path so room and participant ids collapse to `{id}`
/// and `{pid}`.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" | "/api/v1/rooms" | "/api/v1/invitations"
        | "/api/v1/webhooks/media" => path.to_string(),
        _ => normalize_room_endpoint(path),
    }
}

fn normalize_room_endpoint(path: &str) -> String {
    let Some(rest) = path.strip_prefix("/api/v1/rooms/") else {
        return "/other".to_string();
    };
    let parts: Vec<&str> = rest.split('/').collect();

    match parts.as_slice() {
        [id] if is_uuid(id) => "/api/v1/rooms/{id}".to_string(),
        [id, action] if is_uuid(id) && ROOM_ACTIONS.contains(action) => {
            format!("/api/v1/rooms/{{id}}/{action}")
        }
        [id, "participants", "waiting"] if is_uuid(id) => {
            "/api/v1/rooms/{id}/participants/waiting".to_string()
        }
        [id, "invitations", action @ ("accept" | "decline")] if is_uuid(id) => {
            format!("/api/v1/rooms/{{id}}/invitations/{action}")
        }
        [id, "participants", pid, action @ ("admit" | "deny" | "block" | "remove")]
            if is_uuid(id) && is_uuid(pid) =>
        {
            format!("/api/v1/rooms/{{id}}/participants/{{pid}}/{action}")
        }
        _ => "/other".to_string(),
    }
}

fn is_uuid(segment: &str) -> bool {
    uuid::Uuid::parse_str(segment).is_ok()
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution.
///
/// Metric: `room_db_query_duration_seconds`, `room_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("room_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Media Server Metrics
// ============================================================================

/// Record a call to the media server.
///
/// Metric: `room_media_request_duration_seconds`, `room_media_requests_total`
/// Labels: `operation`, `status` (success, error, timeout)
pub fn record_media_request(operation: &str, status: &str, duration: Duration) {
    histogram!("room_media_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_media_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a room lifecycle transition.
///
/// Metric: `room_transitions_total`
/// Labels: `from`, `to`, `trigger` (client, webhook, auto)
pub fn record_room_transition(from: &str, to: &str, trigger: &str) {
    counter!("room_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Record a participant status change.
///
/// Metric: `room_participant_transitions_total`
/// Labels: `to`
pub fn record_participant_transition(to: &str) {
    counter!("room_participant_transitions_total",
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a compare-and-set retry in the coordinator.
///
/// Metric: `room_commit_retries_total`
/// Labels: `operation`
pub fn record_commit_retry(operation: &str) {
    counter!("room_commit_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ============================================================================
// Webhook Metrics
// ============================================================================

/// Record a processed webhook event.
///
/// Metric: `room_webhook_events_total`
/// Labels: `event`, `outcome` (applied, ignored, rejected, error)
pub fn record_webhook_event(event: &str, outcome: &str) {
    counter!("room_webhook_events_total",
        "event" => event.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record an error by operation and error type.
///
/// Metric: `room_errors_total`
/// Labels: `operation`, `error_type`, `status_code`
pub fn record_error(operation: &str, error_type: &str, status_code: u16) {
    counter!("room_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}
