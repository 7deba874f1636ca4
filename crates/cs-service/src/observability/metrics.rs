//! Metrics definitions for the Call Signaling Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cs_` prefix for the Call Signaling Service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: ~10 values (parameterized paths)
//! - `status`: 3 values (success, error, timeout)
//! - `kind`/`path`: bounded by relay code
//! - `operation`: bounded by repository code (create_session, upsert_join, etc.)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `cs_http_requests_total`, `cs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// This captures ALL HTTP responses including framework-level errors like:
/// - 415 Unsupported Media Type (wrong Content-Type)
/// - 400 Bad Request (JSON parse errors)
/// - 404 Not Found
/// - 405 Method Not Allowed
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    // Normalize endpoint to prevent cardinality explosion
    let normalized_endpoint = normalize_endpoint(endpoint);

    // Determine status category for simplified querying
    let status = categorize_status_code(status_code);

    histogram!("cs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
///
/// Replaces dynamic segments (session keys) with placeholders.
fn normalize_endpoint(path: &str) -> String {
    // Known static paths
    match path {
        "/" => "/".to_string(),
        "/health" => "/health".to_string(),
        "/ready" => "/ready".to_string(),
        "/metrics" => "/metrics".to_string(),
        "/ws" => "/ws".to_string(),
        "/api/v1/sessions" => "/api/v1/sessions".to_string(),
        "/api/v1/users/me/calls" => "/api/v1/users/me/calls".to_string(),
        "/api/v1/users/me/calls/statistics" => "/api/v1/users/me/calls/statistics".to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Normalize paths with dynamic segments
///
/// Replaces session keys (UUIDs, room ids, appointment refs) with placeholders.
fn normalize_dynamic_endpoint(path: &str) -> String {
    if path.starts_with("/api/v1/sessions/") {
        let parts: Vec<&str> = path.split('/').collect();

        // /api/v1/sessions/{key} -> parts.len() == 5
        if parts.len() == 5 {
            return "/api/v1/sessions/{key}".to_string();
        }

        // /api/v1/sessions/{id}/join|start|leave|end|cancel -> parts.len() == 6
        if parts.len() == 6 {
            if let Some(action) = parts.get(5) {
                if matches!(*action, "join" | "start" | "leave" | "end" | "cancel") {
                    return format!("/api/v1/sessions/{{id}}/{}", action);
                }
            }
        }
    }

    // Unknown paths normalized to "/other" to bound cardinality
    "/other".to_string()
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Record a relay delivery attempt.
///
/// Metric: `cs_relay_deliveries_total`
/// Labels: `kind` (offer/answer/ice_candidate/key_exchange/notification),
///         `path` (direct/broadcast), `status` (ok/error)
pub fn record_relay(kind: &str, path: &str, status: &str) {
    counter!("cs_relay_deliveries_total",
        "kind" => kind.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Adjust the live WebSocket connection gauge.
///
/// Metric: `cs_ws_connections`
pub fn record_ws_connection_change(delta: i64) {
    gauge!("cs_ws_connections").increment(delta as f64);
}

/// Record a zombie eviction by the liveness sweeper.
///
/// Metric: `cs_liveness_evictions_total`
/// Labels: `status` (evicted/retry)
pub fn record_eviction(status: &str) {
    counter!("cs_liveness_evictions_total",
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Session Lifecycle Metrics
// ============================================================================

/// Record a session lifecycle operation.
///
/// Metric: `cs_session_transitions_total`
/// Labels: `operation` (create/join/start/leave/end/cancel), `status`
pub fn record_session_transition(operation: &str, status: &str) {
    counter!("cs_session_transitions_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Key-Exchange Metrics
// ============================================================================

/// Record a key-exchange message outcome.
///
/// Metric: `cs_e2ee_messages_total`
/// Labels: `message_type`, `outcome` (accepted or the rejection error code)
pub fn record_e2ee_message(message_type: &str, outcome: &str) {
    counter!("cs_e2ee_messages_total",
        "message_type" => message_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `cs_db_query_duration_seconds`, `cs_db_queries_total`
/// Labels: `operation`, `status`
///
/// Operations: create_session, resolve_session, try_start, complete_session,
///             upsert_join, close_participant, insert_audit, call_history, etc.
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("cs_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cs_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests execute the metric recording functions to ensure code
    // coverage. The metrics crate will record to a global no-op recorder if
    // none is installed, which is sufficient here. We don't need to verify
    // the actual metric values - that would require installing a test
    // recorder from metrics-util.

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("POST", "/api/v1/sessions", 201, Duration::from_millis(50));
        record_http_request(
            "POST",
            "/api/v1/sessions/550e8400-e29b-41d4-a716-446655440000/join",
            200,
            Duration::from_millis(80),
        );

        // Error cases
        record_http_request("GET", "/api/v1/sessions/nope", 404, Duration::from_millis(5));
        record_http_request("POST", "/api/v1/sessions", 409, Duration::from_millis(10));

        // Timeout
        record_http_request("GET", "/api/v1/users/me/calls", 504, Duration::from_secs(30));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(299), "success");

        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");

        assert_eq!(categorize_status_code(400), "error");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(409), "error");
        assert_eq!(categorize_status_code(429), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/ws"), "/ws");
        assert_eq!(normalize_endpoint("/api/v1/sessions"), "/api/v1/sessions");
        assert_eq!(
            normalize_endpoint("/api/v1/users/me/calls"),
            "/api/v1/users/me/calls"
        );
    }

    #[test]
    fn test_normalize_endpoint_session_paths() {
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/sessions/{key}"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/room-abc"),
            "/api/v1/sessions/{key}"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/550e8400-e29b-41d4-a716-446655440000/join"),
            "/api/v1/sessions/{id}/join"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/550e8400-e29b-41d4-a716-446655440000/end"),
            "/api/v1/sessions/{id}/end"
        );
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/unknown"), "/other");
        assert_eq!(normalize_endpoint("/api/v2/something"), "/other");
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/id/unknown-action"),
            "/other"
        );
    }

    #[test]
    fn test_record_relay() {
        record_relay("offer", "direct", "ok");
        record_relay("answer", "direct", "error");
        record_relay("ice_candidate", "broadcast", "ok");
        record_relay("key_exchange", "direct", "ok");
    }

    #[test]
    fn test_record_session_transition() {
        record_session_transition("create", "success");
        record_session_transition("end", "conflict");
        record_session_transition("join", "forbidden");
    }

    #[test]
    fn test_record_e2ee_message() {
        record_e2ee_message("key_offer", "accepted");
        record_e2ee_message("key_rotation", "E2EE_RATE_LIMIT");
        record_e2ee_message("key_answer", "E2EE_INVALID_TARGET");
    }

    #[test]
    fn test_record_db_query() {
        record_db_query("create_session", "success", Duration::from_millis(5));
        record_db_query("upsert_join", "success", Duration::from_millis(3));
        record_db_query("insert_audit", "error", Duration::from_millis(50));
    }

    #[test]
    fn test_record_connection_and_eviction() {
        record_ws_connection_change(1);
        record_ws_connection_change(-1);
        record_eviction("evicted");
        record_eviction("retry");
    }
}
