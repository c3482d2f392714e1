use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, apply_to_inbox, now_ms};

impl Engine {
    /// Append a notification for `user_id` about `booking_id`.
    pub async fn append_notification(
        &self,
        user_id: Ulid,
        booking_id: Ulid,
        message: String,
    ) -> Result<Ulid, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::Validation("empty notification message"));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::LimitExceeded("notification message too long"));
        }
        if self.get_vehicle_for_booking(&booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }

        let _commit = self.begin_commit().await;
        let notification = Notification {
            id: Ulid::new(),
            user_id,
            booking_id,
            message,
            is_read: false,
            created_at: now_ms(),
        };
        let id = notification.id;
        let event = Event::NotificationAppended { notification };

        let inbox = self.inbox(user_id);
        let mut guard = inbox.write().await;
        self.wal_append(&event).await?;
        self.index_notification(&event);
        apply_to_inbox(&mut guard, &event);
        drop(guard);

        self.notify.send(user_id, &event);
        Ok(id)
    }

    /// Acknowledge a notification. Marking an already-read notification is a no-op.
    pub async fn mark_notification_read(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.begin_commit().await;
        let user_id = self
            .notification_to_user
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let inbox = self.inbox(user_id);
        let mut guard = inbox.write().await;
        let already_read = guard
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.is_read)
            .ok_or(EngineError::NotFound(id))?;
        if already_read {
            return Ok(());
        }

        let event = Event::NotificationRead { id, user_id };
        self.wal_append(&event).await?;
        apply_to_inbox(&mut guard, &event);
        Ok(())
    }

    /// A user's notifications, newest first.
    pub async fn list_notifications(&self, user_id: Ulid) -> Vec<Notification> {
        let Some(inbox) = self.inboxes.get(&user_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = inbox.read().await;
        // Inbox is in commit order.
        guard.iter().rev().cloned().collect()
    }
}
