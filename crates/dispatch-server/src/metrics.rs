//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "dispatch_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "dispatch_connections_active";
    pub const BOOKINGS_TOTAL: &str = "dispatch_bookings_total";
    pub const ASSIGNMENTS_TOTAL: &str = "dispatch_assignments_total";
    pub const ASSIGNED_BOOKINGS_TOTAL: &str = "dispatch_assigned_bookings_total";
    pub const ASSIGNMENT_CONFLICTS_TOTAL: &str = "dispatch_assignment_conflicts_total";
    pub const EVENTS_DELIVERED_TOTAL: &str = "dispatch_events_delivered_total";
    pub const ERRORS_TOTAL: &str = "dispatch_errors_total";
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
    metrics::describe_counter!(names::BOOKINGS_TOTAL, "Total bookings submitted");
    metrics::describe_counter!(names::ASSIGNMENTS_TOTAL, "Total assignment operations");
    metrics::describe_counter!(
        names::ASSIGNED_BOOKINGS_TOTAL,
        "Total bookings transitioned to assigned"
    );
    metrics::describe_counter!(
        names::ASSIGNMENT_CONFLICTS_TOTAL,
        "Assignment operations that failed after their retry"
    );
    metrics::describe_counter!(
        names::EVENTS_DELIVERED_TOTAL,
        "Event frames delivered to connections"
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

/// Record a submitted booking.
pub fn record_booking() {
    counter!(names::BOOKINGS_TOTAL).increment(1);
}

/// Record a completed assignment operation.
pub fn record_assignment(assigned: usize) {
    counter!(names::ASSIGNMENTS_TOTAL).increment(1);
    counter!(names::ASSIGNED_BOOKINGS_TOTAL).increment(assigned as u64);
}

/// Record an assignment that conflicted after its retry.
pub fn record_assignment_conflict() {
    counter!(names::ASSIGNMENT_CONFLICTS_TOTAL).increment(1);
}

/// Record event deliveries for one fanout call.
pub fn record_event_delivered(event: &str, recipients: usize) {
    counter!(names::EVENTS_DELIVERED_TOTAL, "event" => event.to_string())
        .increment(recipients as u64);
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
