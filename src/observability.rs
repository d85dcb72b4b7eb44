use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, code.
pub const REQUESTS_TOTAL: &str = "checkin_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "checkin_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings committed by admission.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "checkin_bookings_admitted_total";

/// Counter: admission rejections. Labels: reason (no_capacity, duplicate, past_date, invalid).
pub const ADMISSION_REJECTED_TOTAL: &str = "checkin_admission_rejected_total";

/// Counter: visits scheduled.
pub const VISITS_SCHEDULED_TOTAL: &str = "checkin_visits_scheduled_total";

/// Counter: visits refused by the daily visitor ceiling.
pub const VISITS_REJECTED_TOTAL: &str = "checkin_visits_rejected_total";

/// Counter: read-path store failures answered with zero/empty. Labels: path.
pub const STORE_READ_FAILURES_TOTAL: &str = "checkin_store_read_failures_total";

/// Counter: store writes still running after the caller's timeout.
pub const STORE_WRITES_DETACHED: &str = "checkin_store_writes_detached_total";

/// Counter: documents removed by the retention sweep. Labels: kind.
pub const SWEEP_DELETED_TOTAL: &str = "checkin_sweep_deleted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "checkin_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "checkin_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "checkin_connections_rejected_total";

/// Counter: requests with a missing or invalid bearer token.
pub const AUTH_FAILURES_TOTAL: &str = "checkin_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "checkin_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "checkin_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
