//! Standard metrics for Ares.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `ares_requests_total` | Counter | `transport`, `route`, `status` | Completed requests |
//! | `ares_request_duration_seconds` | Histogram | `transport`, `route` | Request latency |
//! | `ares_connections_active` | Gauge | `server` | Open tracked connections |
//!
//! Recording functions are cheap no-ops until a recorder is installed with
//! [`init_metrics`].

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Completed request counter.
pub const REQUESTS_TOTAL: &str = "ares_requests_total";

/// Request latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "ares_request_duration_seconds";

/// Open connection gauge.
pub const CONNECTIONS_ACTIVE: &str = "ares_connections_active";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address for the Prometheus scrape listener; `None` installs the
    /// recorder only, leaving rendering to [`render_metrics`].
    pub listen: Option<String>,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: None,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// With a listen address the exporter also serves `/metrics`; this must then
/// be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable listen address
/// and `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    match &config.listen {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            // Spawns on the current runtime, or on a background thread without one
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    describe_metrics();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized or are served by the
/// exporter's own listener.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests completed");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Request duration in seconds"
    );
    describe_gauge!(CONNECTIONS_ACTIVE, "Number of open tracked connections");
}

/// Records a completed request.
///
/// `transport` is `http` or `grpc`; `route` is the matched pattern or the
/// full RPC method; `status` is the HTTP status or RPC code.
pub fn record_request(transport: &'static str, route: &str, status: &str, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "transport" => transport,
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "transport" => transport,
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records that `server` accepted a connection.
pub fn connection_opened(server: &str) {
    gauge!(CONNECTIONS_ACTIVE, "server" => server.to_string()).increment(1.0);
}

/// Records that a connection on `server` closed.
pub fn connection_closed(server: &str) {
    gauge!(CONNECTIONS_ACTIVE, "server" => server.to_string()).decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.listen.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_request("http", "/v1/user/:id", "200", Duration::from_millis(10));
        record_request("grpc", "/greeter.Greeter/SayHello", "ok", Duration::from_millis(3));
        connection_opened("api");
        connection_closed("api");
    }

    #[test]
    fn test_disabled_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let config = MetricsConfig {
            listen: Some("not-an-address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }
}
