//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: `success`, `error`, `timeout` (or an error code for joins)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rc_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Key generation plus signing; RSA keygen dominates
        .set_buckets_for_metric(
            Matcher::Prefix("rc_credential_issuance".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set credential issuance buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `rc_http_requests_total`, `rc_http_request_duration_seconds`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rc_http_requests_total",
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

/// Replace ids in paths with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/metrics" | "/api/v1/users" | "/api/v1/rooms" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();

    match parts.as_slice() {
        ["", "api", "v1", "users", _] => "/api/v1/users/{user_id}".to_string(),
        ["", "api", "v1", "rooms", _] => "/api/v1/rooms/{room_id}".to_string(),
        ["", "api", "v1", "rooms", _, "join"] => "/api/v1/rooms/{room_id}/join".to_string(),
        ["", "api", "v1", "rooms", _, "leave"] => "/api/v1/rooms/{room_id}/leave".to_string(),
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Room Lifecycle Metrics
// ============================================================================

/// Metric: `rc_rooms_created_total`
pub fn record_room_created() {
    counter!("rc_rooms_created_total").increment(1);
}

/// Metric: `rc_rooms_destroyed_total`
pub fn record_room_destroyed() {
    counter!("rc_rooms_destroyed_total").increment(1);
}

/// Record a join attempt outcome.
///
/// Metric: `rc_room_joins_total`
/// Labels: `status` (`success` or the error code)
pub fn record_room_join(status: &str) {
    counter!("rc_room_joins_total", "status" => status.to_string()).increment(1);
}

/// Metric: `rc_active_rooms`
#[allow(clippy::cast_precision_loss)]
pub fn set_active_rooms(count: usize) {
    gauge!("rc_active_rooms").set(count as f64);
}

// ============================================================================
// Credential Metrics
// ============================================================================

/// Record credential issuance duration.
///
/// Metric: `rc_credential_issuance_duration_seconds`
/// Labels: `status`
pub fn record_credential_issuance(status: &str, duration: Duration) {
    histogram!("rc_credential_issuance_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

// ============================================================================
// Network Process Metrics
// ============================================================================

/// Metric: `rc_network_forced_kills_total`
pub fn record_forced_kill() {
    counter!("rc_network_forced_kills_total").increment(1);
}
