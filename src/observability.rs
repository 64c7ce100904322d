use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings committed. Labels: source (single, recurring).
pub const BOOKINGS_CREATED_TOTAL: &str = "wicket_bookings_created_total";

/// Counter: writes rejected because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "wicket_booking_conflicts_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "wicket_bookings_cancelled_total";

/// Counter: reschedule attempts. Labels: outcome.
pub const RESCHEDULES_TOTAL: &str = "wicket_reschedules_total";

/// Histogram: availability grid computation in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "wicket_availability_duration_seconds";

/// Gauge: grounds open for booking.
pub const GROUNDS_ACTIVE: &str = "wicket_grounds_active";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "wicket_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "wicket_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a reschedule result.
pub fn reschedule_outcome(result: &Result<crate::model::Booking, crate::engine::EngineError>) -> &'static str {
    use crate::engine::EngineError;
    match result {
        Ok(_) => "ok",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::Policy(_)) => "policy",
        Err(EngineError::State(_)) => "state",
        Err(EngineError::Validation(_)) => "invalid",
        Err(EngineError::NotFound(..)) => "not_found",
        Err(_) => "error",
    }
}
