use std::net::SocketAddr;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: reservation requests. Labels: pool, result (accepted/rejected).
pub const RESERVATIONS_TOTAL: &str = "rigledger_reservations_total";

/// Counter: manual status changes. Labels: pool, status, result.
pub const STATUS_UPDATES_TOTAL: &str = "rigledger_status_updates_total";

/// Counter: cache lookups. Labels: cache, result (hit/miss).
pub const CACHE_LOOKUPS_TOTAL: &str = "rigledger_cache_lookups_total";

// ── Background ──────────────────────────────────────────────────

/// Counter: rows changed or skipped by the sweep. Labels: action.
pub const SWEEP_ROWS_TOTAL: &str = "rigledger_sweep_rows_total";

/// Histogram: duration of one sweep pass in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "rigledger_sweep_duration_seconds";

/// Counter: pool file backups. Labels: result (ok/error).
pub const BACKUPS_TOTAL: &str = "rigledger_backups_total";

/// Counter: post-write housekeeping that failed after the write was durable.
/// Labels: step (compact/stamp).
pub const STORE_MAINTENANCE_FAILURES_TOTAL: &str = "rigledger_store_maintenance_failures_total";

// ── Capacity ────────────────────────────────────────────────────

/// Gauge: remaining capacity. Labels: pool, resource (compute/gpu).
pub const POOL_REMAINING: &str = "rigledger_pool_remaining";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
