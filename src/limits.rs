// Hard caps on untrusted input. Everything here is checked before anything is written to the WAL.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_VEHICLES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 10_000;

/// Dates a single booking may reserve.
pub const MAX_DATES_PER_BOOKING: usize = 366;
/// Width of a booking's bounding range, in days.
pub const MAX_BOOKING_SPAN_DAYS: i64 = 366;
/// Explicit dates a vehicle may offer.
pub const MAX_AVAILABILITY_DATES: usize = 3660;
/// Widest window accepted by the free-dates query.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3660;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_MESSAGE_LEN: usize = 1024;
pub const MAX_MEDIA_PER_CHECK: usize = 32;
pub const MAX_MEDIA_REF_LEN: usize = 2048;
