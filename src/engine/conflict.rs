use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::config::ConflictPolicy;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Validate a raw date selection and return it as an ordered set plus its bounding range.
pub fn normalize_dates(dates: &[NaiveDate]) -> Result<(BTreeSet<NaiveDate>, DateRange), EngineError> {
    if dates.len() > MAX_DATES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many dates in booking"));
    }
    let set: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let range = DateRange::bounding(&set).ok_or(EngineError::Validation("no dates given"))?;
    if range.len_days() > MAX_BOOKING_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("booking spans too many days"));
    }
    Ok((set, range))
}

/// Explicit date set to store on a booking: `None` when the selection has no gaps.
pub(super) fn explicit_dates(dates: BTreeSet<NaiveDate>, range: &DateRange) -> Option<BTreeSet<NaiveDate>> {
    if dates.len() as i64 == range.len_days() {
        None
    } else {
        Some(dates)
    }
}

/// First slot-holding booking the candidate collides with, if any.
///
/// `BoundingRange` treats the candidate as reserving every day from its first to its last
/// date and tests stored ranges with `s1 <= e2 && s2 <= e1`. `ExactDates` screens with the
/// same range test and then requires a shared reserved day.
pub fn find_conflict(
    vs: &VehicleState,
    dates: &BTreeSet<NaiveDate>,
    range: &DateRange,
    policy: ConflictPolicy,
) -> Option<Ulid> {
    vs.overlapping(range)
        .filter(|b| b.status.holds_slot())
        .find(|b| match policy {
            ConflictPolicy::BoundingRange => true,
            ConflictPolicy::ExactDates => dates
                .range(b.range.start..=b.range.end)
                .any(|d| b.reserves(*d)),
        })
        .map(|b| b.id)
}

pub(super) fn check_no_conflict(
    vs: &VehicleState,
    dates: &BTreeSet<NaiveDate>,
    range: &DateRange,
    policy: ConflictPolicy,
) -> Result<(), EngineError> {
    match find_conflict(vs, dates, range, policy) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(
                "vehicle {}: [{}, {}] conflicts with booking {existing}",
                vs.id,
                range.start,
                range.end
            );
            Err(EngineError::Conflict(existing))
        }
        None => Ok(()),
    }
}
