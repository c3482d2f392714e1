use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Availability Model ────────────────────────────────────────────

/// Whether the owner offers the vehicle on `date`.
///
/// An explicit availability set must contain the date; open availability offers every date.
pub fn is_date_offered(vehicle: &VehicleState, date: NaiveDate) -> bool {
    match &vehicle.availability {
        Availability::Open => true,
        Availability::Dates(dates) => dates.contains(&date),
    }
}

/// The subset of `dates` the vehicle does not offer, in order.
pub fn unoffered_dates(vehicle: &VehicleState, dates: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    match &vehicle.availability {
        Availability::Open => Vec::new(),
        Availability::Dates(offered) => dates.difference(offered).copied().collect(),
    }
}

/// Dates in `window` that are offered and not reserved by any slot-holding booking.
pub fn free_dates(vehicle: &VehicleState, window: &DateRange) -> Vec<NaiveDate> {
    let reserved: BTreeSet<NaiveDate> = vehicle
        .overlapping(window)
        .filter(|b| b.status.holds_slot())
        .flat_map(|b| b.reserved_dates())
        .filter(|d| window.contains(*d))
        .collect();

    let offered: Vec<NaiveDate> = match &vehicle.availability {
        Availability::Open => window.days().collect(),
        Availability::Dates(dates) => dates.range(window.start..=window.end).copied().collect(),
    };

    offered
        .into_iter()
        .filter(|d| !reserved.contains(d))
        .collect()
}
