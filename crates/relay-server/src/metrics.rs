//! Prometheus instrumentation for the relay.
//!
//! Counters and gauges go through the `metrics` facade; nothing is recorded
//! until [`start_metrics_server`] installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;
use tenvis_relay_core::DispatchOutcome;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const CONNECTION_SECONDS: &str = "relay_connection_seconds";
    pub const PAYLOADS_TOTAL: &str = "relay_payloads_total";
    pub const PAYLOADS_BYTES: &str = "relay_payloads_bytes";
    pub const DISPATCH_TOTAL: &str = "relay_dispatch_total";
    pub const DISPATCH_SECONDS: &str = "relay_dispatch_seconds";
    pub const CHANNELS_ACTIVE: &str = "relay_channels_active";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
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
    metrics::describe_histogram!(
        names::CONNECTION_SECONDS,
        "How long sockets stayed open, in seconds"
    );
    metrics::describe_counter!(names::PAYLOADS_TOTAL, "Total number of payloads processed");
    metrics::describe_counter!(names::PAYLOADS_BYTES, "Total bytes of payloads processed");
    metrics::describe_counter!(names::DISPATCH_TOTAL, "Dispatches by outcome");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound dispatch latency in seconds"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of occupied channels");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Serve `/metrics` on every interface at `port`.
///
/// # Errors
///
/// Fails if the listener cannot bind or a recorder is already installed.
pub fn start_metrics_server(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a payload crossing the transport.
pub fn record_payload(bytes: usize, direction: &'static str) {
    counter!(names::PAYLOADS_TOTAL, "direction" => direction).increment(1);
    counter!(names::PAYLOADS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record how a dispatch ended and how long it took.
pub fn record_dispatch(outcome: &DispatchOutcome, seconds: f64) {
    counter!(names::DISPATCH_TOTAL, "outcome" => outcome.as_str()).increment(1);
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Update occupied channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Tracks one socket for as long as it is held.
pub struct ConnectionMetricsGuard {
    opened: Instant,
}

impl ConnectionMetricsGuard {
    /// Count a socket as opened.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self {
            opened: Instant::now(),
        }
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(names::CONNECTION_SECONDS).record(self.opened.elapsed().as_secs_f64());
    }
}
