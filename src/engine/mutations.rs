use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::unoffered_dates;
use super::conflict::{check_no_conflict, explicit_dates, normalize_dates};
use super::{Engine, EngineError, IdClaim, WalCommand, now_ms};

fn check_len(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

fn validate_availability(availability: &Availability) -> Result<(), EngineError> {
    if let Availability::Dates(dates) = availability
        && dates.len() > MAX_AVAILABILITY_DATES
    {
        return Err(EngineError::LimitExceeded("too many availability dates"));
    }
    Ok(())
}

impl Engine {
    /// Cache a profile handed over by the identity provider. Re-registering replaces it.
    pub async fn register_user(
        &self,
        id: Ulid,
        full_name: Option<String>,
        email: Option<String>,
    ) -> Result<(), EngineError> {
        check_len(&full_name, MAX_NAME_LEN, "full name too long")?;
        check_len(&email, MAX_NAME_LEN, "email too long")?;

        let _commit = self.begin_commit().await;
        let event = Event::UserRegistered {
            profile: UserProfile { id, full_name, email },
        };
        self.wal_append(&event).await?;
        self.apply_global(&event);
        Ok(())
    }

    /// The owner's listing action.
    pub async fn list_vehicle(
        &self,
        id: Ulid,
        owner_id: Ulid,
        price_per_day: Cents,
        availability: Availability,
        summary: VehicleSummary,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_VEHICLES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if price_per_day <= 0 {
            return Err(EngineError::Validation("price per day must be positive"));
        }
        check_len(&summary.make, MAX_NAME_LEN, "make too long")?;
        check_len(&summary.model, MAX_NAME_LEN, "model too long")?;
        check_len(&summary.location, MAX_NAME_LEN, "location too long")?;
        validate_availability(&availability)?;

        let _commit = self.begin_commit().await;
        // While the claim is held no other listing of `id` can apply.
        let _claim =
            IdClaim::take(&self.listing_claims, id).ok_or(EngineError::AlreadyExists(id))?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleListed {
            id,
            owner_id,
            price_per_day,
            availability,
            summary,
        };
        self.wal_append(&event).await?;
        self.apply_global(&event);
        self.notify.send(id, &event);
        tracing::info!("vehicle {id} listed by owner {owner_id}");
        Ok(())
    }

    /// Replace the vehicle's offered dates. Existing bookings are not re-validated.
    pub async fn set_availability(
        &self,
        vehicle_id: Ulid,
        availability: Availability,
    ) -> Result<(), EngineError> {
        validate_availability(&availability)?;
        let _commit = self.begin_commit().await;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;

        let event = Event::AvailabilityUpdated {
            id: vehicle_id,
            availability,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// Reserve `dates` on a vehicle for a renter. The new booking starts `pending`.
    ///
    /// Offer check, conflict check and insert all happen under the vehicle's write lock,
    /// so of two overlapping concurrent requests at most one succeeds.
    pub async fn create_booking(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        renter_id: Ulid,
        dates: &[NaiveDate],
        total_price: Cents,
    ) -> Result<Booking, EngineError> {
        if total_price <= 0 {
            return Err(EngineError::Validation("total price must be positive"));
        }
        let (dates, range) = normalize_dates(dates)?;

        let _commit = self.begin_commit().await;
        // Booking ids are unique across vehicles; the vehicle lock alone does not cover that.
        let _claim = IdClaim::take(&self.booking_claims, id).ok_or(EngineError::AlreadyExists(id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }
        if self.booking_to_vehicle.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(first) = unoffered_dates(&guard, &dates).first() {
            return Err(EngineError::NotOffered(*first));
        }

        check_no_conflict(&guard, &dates, &range, self.config.conflict_policy)?;

        let booking = Booking {
            id,
            vehicle_id,
            renter_id,
            range,
            dates: explicit_dates(dates, &range),
            total_price,
            status: BookingStatus::Pending,
            created_at: now_ms(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "booking {id} created: vehicle {vehicle_id}, renter {renter_id}, [{}, {}]",
            range.start,
            range.end
        );
        Ok(booking)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();

        for entry in self.users.iter() {
            events.push(Event::UserRegistered {
                profile: entry.value().clone(),
            });
        }

        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for vs in vehicles {
            let guard = vs.read().await;
            events.push(Event::VehicleListed {
                id: guard.id,
                owner_id: guard.owner_id,
                price_per_day: guard.price_per_day,
                availability: guard.availability.clone(),
                summary: guard.summary.clone(),
            });
            let mut bookings: Vec<&Booking> = guard.bookings.iter().collect();
            bookings.sort_by_key(|b| (b.created_at, b.id));
            for booking in bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            for record in guard.journeys.values() {
                events.push(Event::JourneyRecorded {
                    vehicle_id: guard.id,
                    record: record.clone(),
                });
            }
        }

        let inboxes: Vec<_> = self.inboxes.iter().map(|e| e.value().clone()).collect();
        for inbox in inboxes {
            let guard = inbox.read().await;
            for notification in guard.iter() {
                events.push(Event::NotificationAppended {
                    notification: notification.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
