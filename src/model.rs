use std::collections::{BTreeSet, HashMap};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps only.
pub type Ms = i64;

/// Money in integer minor units (cents). No floating point anywhere near prices.
pub type Cents = i64;

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Bounding range of a date selection. `None` for an empty selection.
    pub fn bounding(dates: &BTreeSet<NaiveDate>) -> Option<Self> {
        let start = *dates.first()?;
        let end = *dates.last()?;
        Some(Self { start, end })
    }

    /// Two inclusive ranges intersect iff `s1 <= e2 && s2 <= e1`.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Every day of the range in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let day = next?;
            next = if day < self.end {
                day.checked_add_days(Days::new(1))
            } else {
                None
            };
            Some(day)
        })
    }
}

/// The dates a vehicle's owner has declared offerable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// No explicit dates declared: every date is offered.
    Open,
    /// Only these dates are offered.
    Dates(BTreeSet<NaiveDate>),
}

impl Availability {
    /// Build from an explicit list. An empty list means open availability.
    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let set: BTreeSet<NaiveDate> = dates.into_iter().collect();
        if set.is_empty() {
            Availability::Open
        } else {
            Availability::Dates(set)
        }
    }
}

/// Descriptive fields joined into booking listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSummary {
    pub make: Option<String>,
    pub model: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "rejected" => Some(BookingStatus::Rejected),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Completed | BookingStatus::Cancelled
        )
    }

    /// Whether a booking in this status still occupies its dates.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }

    /// The lifecycle state machine.
    ///
    /// ```text
    /// pending   -> confirmed | rejected | cancelled
    /// confirmed -> completed | cancelled
    /// ```
    /// Everything else, including self-transitions, is illegal.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub renter_id: Ulid,
    /// Min/max bound of the reserved dates; the fast overlap screen.
    pub range: DateRange,
    /// Explicit reserved dates when the selection has gaps. `None` means every day of `range`.
    pub dates: Option<BTreeSet<NaiveDate>>,
    pub total_price: Cents,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    pub fn reserves(&self, date: NaiveDate) -> bool {
        match &self.dates {
            Some(dates) => dates.contains(&date),
            None => self.range.contains(date),
        }
    }

    /// Reserved dates in order, expanded from the range when no explicit set is stored.
    pub fn reserved_dates(&self) -> Vec<NaiveDate> {
        match &self.dates {
            Some(dates) => dates.iter().copied().collect(),
            None => self.range.days().collect(),
        }
    }
}

/// One side of an inspection (pre- or post-journey).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub mileage: u32,
    pub notes: Option<String>,
    /// References returned by media storage. Never raw bytes.
    pub media: Vec<String>,
    pub recorded_at: Ms,
}

/// Pre/post inspection pair bound 1:1 to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyRecord {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub before: Inspection,
    pub after: Option<Inspection>,
}

impl JourneyRecord {
    pub fn is_finished(&self) -> bool {
        self.after.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub booking_id: Ulid,
    pub message: String,
    pub is_read: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Ulid,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub price_per_day: Cents,
    pub availability: Availability,
    pub summary: VehicleSummary,
    /// Every booking ever made for this vehicle, sorted by `range.start`.
    pub bookings: Vec<Booking>,
    /// Journey records keyed by booking id.
    pub journeys: HashMap<Ulid, JourneyRecord>,
}

impl VehicleState {
    pub fn new(
        id: Ulid,
        owner_id: Ulid,
        price_per_day: Cents,
        availability: Availability,
        summary: VehicleSummary,
    ) -> Self {
        Self {
            id,
            owner_id,
            price_per_day,
            availability,
            summary,
            bookings: Vec::new(),
            journeys: HashMap::new(),
        }
    }

    /// Insert booking maintaining sort order by range start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start <= booking.range.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings whose stored range intersects `query`, regardless of status.
    /// Everything at index >= right_bound starts after `query.end` and can't intersect.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.range.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= query.start)
    }
}

/// WAL record format. Flat, no nesting beyond the entities themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        profile: UserProfile,
    },
    VehicleListed {
        id: Ulid,
        owner_id: Ulid,
        price_per_day: Cents,
        availability: Availability,
        summary: VehicleSummary,
    },
    AvailabilityUpdated {
        id: Ulid,
        availability: Availability,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: BookingStatus,
    },
    /// A journey record in its current shape (pre-journey only, or complete after compaction).
    JourneyRecorded {
        vehicle_id: Ulid,
        record: JourneyRecord,
    },
    /// Post-journey fields and the owner's notification, committed as one record.
    JourneyFinished {
        vehicle_id: Ulid,
        booking_id: Ulid,
        after: Inspection,
        notification: Notification,
    },
    NotificationAppended {
        notification: Notification,
    },
    NotificationRead {
        id: Ulid,
        user_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub price_per_day: Cents,
    pub availability: Availability,
    pub summary: VehicleSummary,
}

/// A renter's view of one of their bookings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenterBooking {
    pub booking: Booking,
    pub owner_id: Ulid,
    pub vehicle: VehicleSummary,
}

/// An owner's view of a booking on one of their vehicles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerBooking {
    pub booking: Booking,
    pub vehicle: VehicleSummary,
    pub renter: Option<UserProfile>,
}
