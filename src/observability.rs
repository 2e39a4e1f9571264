use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "roombook_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "roombook_request_duration_seconds";

// ── Scheduling outcomes ─────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";
pub const BOOKINGS_UPDATED_TOTAL: &str = "roombook_bookings_updated_total";
pub const BOOKINGS_DELETED_TOTAL: &str = "roombook_bookings_deleted_total";

/// Counter: candidates rejected because they overlap an existing booking.
pub const CONFLICTS_TOTAL: &str = "roombook_conflicts_total";

pub const VALIDATION_FAILURES_TOTAL: &str = "roombook_validation_failures_total";

/// Counter: failed or timed-out store calls. Labels: op.
pub const STORE_ERRORS_TOTAL: &str = "roombook_store_errors_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: log group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
