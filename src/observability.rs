use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "carshare_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "carshare_query_duration_seconds";

// ── Connections and tenants ─────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "carshare_connections_active";
pub const CONNECTIONS_TOTAL: &str = "carshare_connections_total";

/// Counter: connections refused at the max-connections limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "carshare_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "carshare_tenants_active";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carshare_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "carshare_wal_flush_batch_size";

// ── Reservations ────────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "carshare_bookings_created_total";

/// Counter: booking requests refused for overlapping an existing booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "carshare_booking_conflicts_total";

/// Counter: booking status changes. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "carshare_status_transitions_total";

pub const JOURNEYS_FINISHED_TOTAL: &str = "carshare_journeys_finished_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install metrics exporter on port {port}: {e}"),
    }
}

/// Short metrics label for a parsed statement.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterUser { .. } => "register_user",
        Command::ListVehicle { .. } => "list_vehicle",
        Command::SetAvailability { .. } => "set_availability",
        Command::CreateBooking { .. } => "create_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBookingsForRenter { .. } => "select_bookings_renter",
        Command::SelectBookingsForOwner { .. } => "select_bookings_owner",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectAvailability { .. } => "select_availability",
        Command::BeginJourney { .. } => "begin_journey",
        Command::EndJourney { .. } => "end_journey",
        Command::SelectJourney { .. } => "select_journey",
        Command::InsertNotification { .. } => "insert_notification",
        Command::SelectNotifications { .. } => "select_notifications",
        Command::MarkNotificationRead { .. } => "mark_notification_read",
    }
}
