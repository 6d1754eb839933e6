use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts committed. Labels: operation.
pub const BOOKINGS_TOTAL: &str = "chairtime_bookings_total";

/// Counter: booking attempts rejected. Labels: operation, reason.
pub const REJECTIONS_TOTAL: &str = "chairtime_rejections_total";

/// Counter: availability queries served.
pub const SLOT_QUERIES_TOTAL: &str = "chairtime_slot_queries_total";

/// Counter: per-slot lock acquisitions that timed out.
pub const SLOT_CONTENTION_TOTAL: &str = "chairtime_slot_contention_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active units (loaded engines).
pub const UNITS_ACTIVE: &str = "chairtime_units_active";

/// Counter: pending bookings reaped after expiry.
pub const PENDING_EXPIRED_TOTAL: &str = "chairtime_pending_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

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

/// Map a rejection to a short label for metrics.
pub fn reason_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::AdvanceTooSoon => "advance_too_soon",
        EngineError::AdvanceTooFar => "advance_too_far",
        EngineError::DailyLimitExceeded => "daily_limit_exceeded",
        EngineError::ClientBlocked { .. } => "client_blocked",
        EngineError::CancellationLimitExceeded => "cancellation_limit_exceeded",
        EngineError::CancelTooLate => "cancel_too_late",
        EngineError::RescheduleTooLate => "reschedule_too_late",
        EngineError::SlotUnavailable => "slot_unavailable",
        EngineError::SlotContended => "slot_contended",
        EngineError::AlreadyCancelled(_) => "already_cancelled",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::BarberUnknown(_) => "barber_unknown",
        EngineError::NotFound(_) => "not_found",
        EngineError::InsufficientCredit(_) => "insufficient_credit",
        EngineError::InvalidRating(_) => "invalid_rating",
        EngineError::AlreadyRated(_) => "already_rated",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal_error",
    }
}
