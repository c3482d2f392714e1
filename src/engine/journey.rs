use ulid::Ulid;

use crate::config::JourneyGuard;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, apply_to_inbox, now_ms};

/// Inspection data submitted by the renter at either end of a trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionInput {
    pub mileage: u32,
    pub notes: Option<String>,
    /// References already returned by media storage.
    pub media: Vec<String>,
}

impl InspectionInput {
    fn validate(&self) -> Result<(), EngineError> {
        if let Some(notes) = &self.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if self.media.len() > MAX_MEDIA_PER_CHECK {
            return Err(EngineError::LimitExceeded("too many media references"));
        }
        if self.media.iter().any(|m| m.trim().is_empty()) {
            return Err(EngineError::Validation("empty media reference"));
        }
        if self.media.iter().any(|m| m.len() > MAX_MEDIA_REF_LEN) {
            return Err(EngineError::LimitExceeded("media reference too long"));
        }
        Ok(())
    }

    fn into_inspection(self) -> Inspection {
        Inspection {
            mileage: self.mileage,
            notes: self.notes,
            media: self.media,
            recorded_at: now_ms(),
        }
    }
}

fn completion_message(summary: &VehicleSummary) -> String {
    match (&summary.make, &summary.model) {
        (Some(make), Some(model)) => format!("Your {make} {model} has completed its journey."),
        _ => "Your vehicle has completed its journey.".to_string(),
    }
}

impl Engine {
    /// Open the journey record for a booking with the pre-journey inspection.
    pub async fn begin_journey(
        &self,
        booking_id: Ulid,
        input: InspectionInput,
    ) -> Result<JourneyRecord, EngineError> {
        input.validate()?;
        let _commit = self.begin_commit().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let status = guard
            .booking(&booking_id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(booking_id))?;
        if self.config.journey_guard == JourneyGuard::RequireConfirmed
            && status != BookingStatus::Confirmed
        {
            return Err(EngineError::NotConfirmed {
                id: booking_id,
                status,
            });
        }
        if guard.journeys.contains_key(&booking_id) {
            return Err(EngineError::DuplicateJourney(booking_id));
        }

        let record = JourneyRecord {
            id: Ulid::new(),
            booking_id,
            before: input.into_inspection(),
            after: None,
        };
        let event = Event::JourneyRecorded {
            vehicle_id,
            record: record.clone(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        tracing::info!("journey started for booking {booking_id} at {} km", record.before.mileage);
        Ok(record)
    }

    /// Record the post-journey inspection and notify the vehicle's owner.
    ///
    /// The inspection, its media and the owner's notification are one WAL record, applied while
    /// holding both the vehicle and the owner's inbox locks: either all of it is visible or none.
    pub async fn end_journey(
        &self,
        booking_id: Ulid,
        input: InspectionInput,
    ) -> Result<JourneyRecord, EngineError> {
        input.validate()?;
        let _commit = self.begin_commit().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let record = guard
            .journeys
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if record.is_finished() {
            return Err(EngineError::AlreadyFinished(booking_id));
        }
        if input.mileage < record.before.mileage {
            return Err(EngineError::Validation("mileage after journey is below mileage before"));
        }

        let owner_id = guard.owner_id;
        let notification = Notification {
            id: Ulid::new(),
            user_id: owner_id,
            booking_id,
            message: completion_message(&guard.summary),
            is_read: false,
            created_at: now_ms(),
        };
        let event = Event::JourneyFinished {
            vehicle_id,
            booking_id,
            after: input.into_inspection(),
            notification,
        };

        let inbox = self.inbox(owner_id);
        let mut inbox_guard = inbox.write().await;
        self.wal_append(&event).await?;
        self.apply_to_vehicle(&mut guard, &event);
        self.index_notification(&event);
        apply_to_inbox(&mut inbox_guard, &event);
        drop(inbox_guard);

        self.notify.send(vehicle_id, &event);
        self.notify.send(owner_id, &event);
        metrics::counter!(crate::observability::JOURNEYS_FINISHED_TOTAL).increment(1);
        tracing::info!("journey finished for booking {booking_id}; owner {owner_id} notified");

        guard
            .journeys
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    pub async fn get_journey(&self, booking_id: Ulid) -> Result<JourneyRecord, EngineError> {
        let guard = self.resolve_booking_read(&booking_id).await?;
        guard
            .journeys
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }
}
