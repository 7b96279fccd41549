//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use herald_protocol::Reply;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const REQUESTS_TOTAL: &str = "herald_requests_total";
    pub const MESSAGES_TOTAL: &str = "herald_messages_total";
    pub const MESSAGES_BYTES: &str = "herald_messages_bytes";
    pub const TOPICS_ACTIVE: &str = "herald_topics_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "herald_subscriptions_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "herald_events_dropped_total";
    pub const LATENCY_SECONDS: &str = "herald_latency_seconds";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Client requests by action");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames sent");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames sent");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of topics");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of topic subscriptions"
    );
    metrics::describe_counter!(
        names::EVENTS_DROPPED_TOTAL,
        "Events dropped because a subscriber fell behind"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a handled request and its outcome.
pub fn record_request(action: &'static str, reply: &Reply) {
    counter!(names::REQUESTS_TOTAL, "action" => action).increment(1);
    if let Reply::Error { error, .. } = reply {
        record_error(error.code.as_str());
    }
}

/// Record an outbound frame.
pub fn record_message(bytes: usize, kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
    counter!(names::MESSAGES_BYTES, "kind" => kind).increment(bytes as u64);
}

/// Record request latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record events a subscriber lost to backpressure.
pub fn record_dropped(count: u64) {
    if count > 0 {
        counter!(names::EVENTS_DROPPED_TOTAL).increment(count);
    }
}

/// Update active topic count.
pub fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::ErrorCode;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder is installed in tests; every call must be a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_request("subscribe", &Reply::ack(None, Some("t".into())));
        record_request(
            "publish",
            &Reply::error(None, ErrorCode::NotFound, "Topic not found: t", None),
        );
        record_dropped(0);
        record_dropped(3);
        set_active_topics(2);
    }
}
