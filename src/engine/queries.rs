use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_dates, unoffered_dates};
use super::conflict::{check_no_conflict, normalize_dates};
use super::{Engine, EngineError};

impl Engine {
    /// Conflict pre-flight: would `dates` be bookable on this vehicle right now?
    ///
    /// Read-only. `create_booking` repeats the same checks under the write lock,
    /// so a positive answer here is advisory only.
    pub async fn check_availability(
        &self,
        vehicle_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<(), EngineError> {
        let (dates, range) = normalize_dates(dates)?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        if let Some(first) = unoffered_dates(&guard, &dates).first() {
            return Err(EngineError::NotOffered(*first));
        }
        check_no_conflict(&guard, &dates, &range, self.config.conflict_policy)
    }

    pub async fn free_dates(
        &self,
        vehicle_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if from > to {
            return Err(EngineError::Validation("window start is after its end"));
        }
        let window = DateRange::new(from, to);
        if window.len_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(free_dates(&guard, &window))
    }

    pub async fn get_vehicle(&self, id: Ulid) -> Option<VehicleInfo> {
        let vs = self.get_vehicle_state(&id)?;
        let guard = vs.read().await;
        Some(VehicleInfo {
            id: guard.id,
            owner_id: guard.owner_id,
            price_per_day: guard.price_per_day,
            availability: guard.availability.clone(),
            summary: guard.summary.clone(),
        })
    }

    pub fn get_user(&self, id: &Ulid) -> Option<UserProfile> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_booking_read(&id).await?;
        guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// A renter's bookings joined with the vehicle summary, newest first.
    pub async fn list_bookings_for_renter(&self, renter_id: Ulid) -> Vec<RenterBooking> {
        let booking_ids: Vec<Ulid> = self
            .renter_bookings
            .get(&renter_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(booking_ids.len());
        for id in &booking_ids {
            let Ok(guard) = self.resolve_booking_read(id).await else {
                continue;
            };
            if let Some(booking) = guard.booking(id) {
                out.push(RenterBooking {
                    booking: booking.clone(),
                    owner_id: guard.owner_id,
                    vehicle: guard.summary.clone(),
                });
            }
        }
        out.sort_by(|a, b| {
            (b.booking.created_at, b.booking.id).cmp(&(a.booking.created_at, a.booking.id))
        });
        out
    }

    /// Bookings on an owner's vehicles joined with vehicle and renter summaries, newest first.
    pub async fn list_bookings_for_owner(&self, owner_id: Ulid) -> Vec<OwnerBooking> {
        let vehicle_ids: Vec<Ulid> = self
            .owner_vehicles
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::new();
        for vehicle_id in vehicle_ids {
            let Some(vs) = self.get_vehicle_state(&vehicle_id) else {
                continue;
            };
            let guard = vs.read().await;
            for booking in &guard.bookings {
                out.push(OwnerBooking {
                    booking: booking.clone(),
                    vehicle: guard.summary.clone(),
                    renter: self.get_user(&booking.renter_id),
                });
            }
        }
        out.sort_by(|a, b| {
            (b.booking.created_at, b.booking.id).cmp(&(a.booking.created_at, a.booking.id))
        });
        out
    }
}
