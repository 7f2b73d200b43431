use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "chairtime_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "chairtime_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "chairtime_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "chairtime_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "chairtime_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "chairtime_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "chairtime_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "chairtime_bookings_created_total";

/// Counter: booking attempts rejected because the slot was taken or closed.
pub const BOOKING_CONFLICTS_TOTAL: &str = "chairtime_booking_conflicts_total";

/// Counter: status changes. Labels: from, to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "chairtime_status_transitions_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertStylist { .. } => "upsert_stylist",
        Command::UpsertWindow(_) => "upsert_window",
        Command::DeleteWindow { .. } => "delete_window",
        Command::UpsertService(_) => "upsert_service",
        Command::UpsertCustomer(_) => "upsert_customer",
        Command::InsertBooking(_) => "insert_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSchedules { .. } => "select_schedules",
        Command::SelectStylists => "select_stylists",
        Command::SelectServices => "select_services",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectCustomerBookings { .. } => "select_customer_bookings",
        Command::SelectAgenda { .. } => "select_agenda",
    }
}
