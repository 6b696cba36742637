//! Metrics collection and export for the dashboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "everest_connect_attempts_total";
    pub const CONNECTION_UP: &str = "everest_connection_up";
    pub const MESSAGES_TOTAL: &str = "everest_messages_total";
    pub const PUBLISHES_TOTAL: &str = "everest_publishes_total";
    pub const SUBSCRIPTION_OPS_TOTAL: &str = "everest_subscription_ops_total";
    pub const ERRORS_TOTAL: &str = "everest_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECT_ATTEMPTS_TOTAL,
        "Connect attempts dispatched since process start"
    );
    metrics::describe_gauge!(
        names::CONNECTION_UP,
        "Whether the broker connection is currently established"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Inbound broker messages by topic category"
    );
    metrics::describe_counter!(names::PUBLISHES_TOTAL, "Outbound publishes dispatched");
    metrics::describe_counter!(
        names::SUBSCRIPTION_OPS_TOTAL,
        "Subscribe/unsubscribe outcomes by kind"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors by type");

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

/// Record a dispatched connect attempt.
pub fn record_connect_attempt() {
    counter!(names::CONNECT_ATTEMPTS_TOTAL).increment(1);
}

/// Update the connection-up gauge.
pub fn set_connection_up(up: bool) {
    gauge!(names::CONNECTION_UP).set(if up { 1.0 } else { 0.0 });
}

/// Record an inbound message.
pub fn record_message(category: &str) {
    counter!(names::MESSAGES_TOTAL, "category" => category.to_string()).increment(1);
}

/// Record an outbound publish.
pub fn record_publish() {
    counter!(names::PUBLISHES_TOTAL).increment(1);
}

/// Record a subscription operation outcome.
pub fn record_subscription_op(kind: &str, success: bool) {
    let outcome = if success { "ok" } else { "failed" };
    counter!(
        names::SUBSCRIPTION_OPS_TOTAL,
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}
