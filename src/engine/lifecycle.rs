use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Move a booking through its state machine. Returns the updated booking.
    ///
    /// Date overlap is not re-checked here: a booking keeps its slot from creation
    /// until it is rejected or cancelled.
    pub async fn update_booking_status(
        &self,
        id: Ulid,
        next: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let _commit = self.begin_commit().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            vehicle_id,
            status: next,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => next.as_str())
            .increment(1);
        tracing::info!("booking {id}: {current} -> {next}");
        guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.update_booking_status(id, BookingStatus::Cancelled).await
    }
}
