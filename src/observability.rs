use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "toolshed_bookings_created_total";

/// Counter: applied status transitions. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "toolshed_transitions_total";

/// Counter: requests rejected for overlapping a committed booking. Labels: stage.
pub const CONFLICTS_TOTAL: &str = "toolshed_conflicts_total";

/// Counter: transitions lost to a concurrent compare-and-swap.
pub const STALE_TRANSITIONS_TOTAL: &str = "toolshed_stale_transitions_total";

/// Counter: bookings whose counterparty was rewritten to a new holder.
pub const HOLDER_REWRITES_TOTAL: &str = "toolshed_holder_rewrites_total";

/// Gauge: picked bookings whose holder propagation has not finished.
pub const PROPAGATIONS_PENDING: &str = "toolshed_propagations_pending";

/// Counter: ratings accepted. Labels: side.
pub const RATINGS_TOTAL: &str = "toolshed_ratings_total";

// ── Side effects and storage ────────────────────────────────────

/// Counter: notifications that could not be delivered.
pub const NOTIFY_FAILURES_TOTAL: &str = "toolshed_notify_failures_total";

/// Counter: retried transient failures. Labels: op.
pub const STORE_RETRIES_TOTAL: &str = "toolshed_store_retries_total";

/// Counter: writes refused because the WAL writer queue stayed full.
pub const STORE_TIMEOUTS_TOTAL: &str = "toolshed_store_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "toolshed_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "toolshed_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
