use std::net::SocketAddr;

use crate::engine::ConflictKind;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "slotlock_bookings_committed_total";

/// Counter: bookings rejected by an exclusion check. Labels: kind.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotlock_booking_conflicts_total";

/// Counter: bookings confirmed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotlock_bookings_confirmed_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotlock_bookings_cancelled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live resources in the catalog.
pub const RESOURCES_ACTIVE: &str = "slotlock_resources_active";

/// Counter: WAL compactions that failed and will be retried.
pub const COMPACT_FAILURES_TOTAL: &str = "slotlock_compact_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotlock_wal_flush_batch_size";

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

/// Plain fmt subscriber for embedders and binaries that want engine logs.
/// Callers that install their own subscriber skip this.
pub fn init_logging() {
    tracing_subscriber::fmt::init();
}

/// Map a conflict kind to a short label for metrics.
pub fn conflict_label(kind: ConflictKind) -> &'static str {
    match kind {
        ConflictKind::UserResourceOverlap => "user_resource_overlap",
        ConflictKind::StaffOverlap => "staff_overlap",
        ConflictKind::CapacityExceeded => "capacity_exceeded",
    }
}
