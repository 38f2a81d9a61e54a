use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "marquee_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "marquee_http_request_duration_seconds";

// ── Seat protocol ───────────────────────────────────────────────

/// Counter: hold requests. Labels: outcome (granted, conflict).
pub const HOLDS_TOTAL: &str = "marquee_holds_total";

/// Counter: held seats returned to available by the expiry sweep.
pub const SEATS_EXPIRED_TOTAL: &str = "marquee_seats_expired_total";

/// Counter: booking attempts and cancellations. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "marquee_bookings_total";

/// Counter: holder mismatches no expiry explains.
pub const INTEGRITY_ERRORS_TOTAL: &str = "marquee_integrity_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: showtimes with materialized seat state.
pub const SHOWTIMES_ACTIVE: &str = "marquee_showtimes_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "marquee_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "marquee_wal_flush_batch_size";

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "marquee=info,tower_http=info";

/// Install the `tracing` fmt subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
