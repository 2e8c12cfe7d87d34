use std::net::SocketAddr;

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: reservation requests (and child requests) created.
pub const REQUESTS_CREATED_TOTAL: &str = "shongo_requests_created_total";

/// Counter: reservation trees allocated.
pub const RESERVATIONS_ALLOCATED_TOTAL: &str = "shongo_reservations_allocated_total";

/// Counter: failed allocations. Labels: reason.
pub const ALLOCATION_FAILURES_TOTAL: &str = "shongo_allocation_failures_total";

/// Counter: reservation nodes physically deleted.
pub const RESERVATIONS_DELETED_TOTAL: &str = "shongo_reservations_deleted_total";

/// Counter: running executables whose slot was cut short by a deletion.
pub const EXECUTABLES_CLAMPED_TOTAL: &str = "shongo_executables_clamped_total";

// ── Store ───────────────────────────────────────────────────────

/// Gauge: reservation nodes currently stored.
pub const LIVE_RESERVATIONS: &str = "shongo_live_reservations";

/// Histogram: committed transaction duration in seconds. Labels: operation.
pub const TRANSACTION_DURATION_SECONDS: &str = "shongo_transaction_duration_seconds";

/// Histogram: cleanup pass duration in seconds.
pub const CLEANUP_DURATION_SECONDS: &str = "shongo_cleanup_duration_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shongo_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shongo_wal_flush_batch_size";

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
