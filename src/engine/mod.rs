mod availability;
mod conflict;
mod error;
mod journey;
mod lifecycle;
mod mutations;
mod notifications;
mod queries;

pub use availability::{free_dates, is_date_offered, unoffered_dates};
pub use conflict::{find_conflict, normalize_dates};
pub use error::EngineError;
pub use journey::InspectionInput;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// A user's notifications, oldest first.
pub type SharedInbox = Arc<RwLock<Vec<Notification>>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    /// Stop the writer as if its file had gone away; later appends fail.
    #[cfg(test)]
    Halt,
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the batch; it runs after the batch is flushed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                if !handle_non_append(&mut wal, other) {
                    break;
                }
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred
            && !handle_non_append(&mut wal, cmd)
        {
            break;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so buffered bytes never leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

/// Returns false when the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::Halt => return false,
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
    true
}

/// The reservation engine for one tenant.
///
/// Vehicle state (bookings and journey records) sits behind one lock per vehicle, so
/// check-then-create on a vehicle is serialized while different vehicles proceed in parallel.
/// Notifications sit in per-user inboxes. When both are touched, the vehicle lock is taken first.
pub struct Engine {
    pub state: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub config: EngineConfig,
    /// booking id → vehicle id
    pub(super) booking_to_vehicle: DashMap<Ulid, Ulid>,
    /// owner id → vehicle ids
    pub(super) owner_vehicles: DashMap<Ulid, Vec<Ulid>>,
    /// renter id → booking ids
    pub(super) renter_bookings: DashMap<Ulid, Vec<Ulid>>,
    pub(super) inboxes: DashMap<Ulid, SharedInbox>,
    /// notification id → user id
    pub(super) notification_to_user: DashMap<Ulid, Ulid>,
    pub(super) users: DashMap<Ulid, UserProfile>,
    /// Vehicle ids with a listing in flight.
    pub(super) listing_claims: DashSet<Ulid>,
    /// Booking ids with a creation in flight, across all vehicles.
    pub(super) booking_claims: DashSet<Ulid>,
    /// Held shared by every mutation from validation through apply, exclusively by
    /// compaction so the snapshot and the WAL swap never race an in-flight append.
    /// Always acquired before any vehicle or inbox lock.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply a notification-bearing event to an inbox (caller holds the lock).
pub(super) fn apply_to_inbox(inbox: &mut Vec<Notification>, event: &Event) {
    match event {
        Event::NotificationAppended { notification }
        | Event::JourneyFinished { notification, .. } => inbox.push(notification.clone()),
        Event::NotificationRead { id, .. } => {
            if let Some(n) = inbox.iter_mut().find(|n| n.id == *id) {
                n.is_read = true;
            }
        }
        _ => {}
    }
}

/// Vehicle whose state an event mutates, if any.
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AvailabilityUpdated { id, .. } => Some(*id),
        Event::BookingCreated { booking } => Some(booking.vehicle_id),
        Event::BookingStatusChanged { vehicle_id, .. }
        | Event::JourneyRecorded { vehicle_id, .. }
        | Event::JourneyFinished { vehicle_id, .. } => Some(*vehicle_id),
        Event::UserRegistered { .. }
        | Event::VehicleListed { .. }
        | Event::NotificationAppended { .. }
        | Event::NotificationRead { .. } => None,
    }
}

/// User whose inbox an event mutates, if any.
fn event_inbox_user(event: &Event) -> Option<Ulid> {
    match event {
        Event::NotificationAppended { notification }
        | Event::JourneyFinished { notification, .. } => Some(notification.user_id),
        Event::NotificationRead { user_id, .. } => Some(*user_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            config,
            booking_to_vehicle: DashMap::new(),
            owner_vehicles: DashMap::new(),
            renter_bookings: DashMap::new(),
            inboxes: DashMap::new(),
            notification_to_user: DashMap::new(),
            users: DashMap::new(),
            listing_claims: DashSet::new(),
            booking_claims: DashSet::new(),
            commit_gate: RwLock::new(()),
        };

        // Replay runs before the engine is shared, so try_write always succeeds.
        // Never block here: this may run inside an async context (lazy tenant creation).
        for event in &events {
            engine.apply_global(event);
            if let Some(vehicle_id) = event_vehicle_id(event)
                && let Some(vs) = engine.get_vehicle_state(&vehicle_id)
            {
                let mut guard = vs
                    .try_write()
                    .map_err(|_| io::Error::other("replay: vehicle state contended"))?;
                engine.apply_to_vehicle(&mut guard, event);
            }
            if let Some(user_id) = event_inbox_user(event) {
                let inbox = engine.inbox(user_id);
                let mut guard = inbox
                    .try_write()
                    .map_err(|_| io::Error::other("replay: inbox contended"))?;
                engine.index_notification(event);
                apply_to_inbox(&mut guard, event);
            }
        }

        tracing::debug!(
            "replayed {} events: {} vehicles, {} users",
            events.len(),
            engine.state.len(),
            engine.users.len()
        );
        Ok(engine)
    }

    /// Events that touch engine-wide maps rather than one vehicle or inbox.
    fn apply_global(&self, event: &Event) {
        match event {
            Event::UserRegistered { profile } => {
                self.users.insert(profile.id, profile.clone());
            }
            Event::VehicleListed {
                id,
                owner_id,
                price_per_day,
                availability,
                summary,
            } => {
                // First listing of an id wins; a repeat must not drop its bookings.
                if let Entry::Vacant(slot) = self.state.entry(*id) {
                    let vs = VehicleState::new(
                        *id,
                        *owner_id,
                        *price_per_day,
                        availability.clone(),
                        summary.clone(),
                    );
                    slot.insert(Arc::new(RwLock::new(vs)));
                    self.owner_vehicles.entry(*owner_id).or_default().push(*id);
                }
            }
            _ => {}
        }
    }

    /// Apply an event directly to a VehicleState (caller holds the lock).
    pub(super) fn apply_to_vehicle(&self, vs: &mut VehicleState, event: &Event) {
        match event {
            Event::AvailabilityUpdated { availability, .. } => {
                vs.availability = availability.clone();
            }
            Event::BookingCreated { booking } => {
                self.booking_to_vehicle.insert(booking.id, vs.id);
                self.renter_bookings
                    .entry(booking.renter_id)
                    .or_default()
                    .push(booking.id);
                vs.insert_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status, .. } => {
                if let Some(b) = vs.booking_mut(id) {
                    b.status = *status;
                }
            }
            Event::JourneyRecorded { record, .. } => {
                vs.journeys.insert(record.booking_id, record.clone());
            }
            Event::JourneyFinished {
                booking_id, after, ..
            } => {
                if let Some(record) = vs.journeys.get_mut(booking_id) {
                    record.after = Some(after.clone());
                }
            }
            Event::UserRegistered { .. }
            | Event::VehicleListed { .. }
            | Event::NotificationAppended { .. }
            | Event::NotificationRead { .. } => {}
        }
    }

    fn index_notification(&self, event: &Event) {
        if let Event::NotificationAppended { notification }
        | Event::JourneyFinished { notification, .. } = event
        {
            self.notification_to_user
                .insert(notification.id, notification.user_id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    #[cfg(test)]
    pub(super) async fn halt_wal_writer(&self) {
        let _ = self.wal_tx.send(WalCommand::Halt).await;
        // Every later append fails once the receiver is gone.
        self.wal_tx.closed().await;
    }

    pub fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_vehicle.get(booking_id).map(|e| *e.value())
    }

    /// The user's inbox, created empty on first use.
    pub(super) fn inbox(&self, user_id: Ulid) -> SharedInbox {
        self.inboxes
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .value()
            .clone()
    }

    pub(super) async fn begin_commit(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// WAL-append + apply + notify for a single-vehicle event.
    /// Caller holds the commit gate and the vehicle's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        vehicle_id: Ulid,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_vehicle(vs, event);
        self.notify.send(vehicle_id, event);
        Ok(())
    }

    /// Lookup booking → vehicle, get vehicle, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .get_vehicle_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }

    /// Lookup booking → vehicle, get vehicle, acquire read lock.
    pub(super) async fn resolve_booking_read(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<VehicleState>, EngineError> {
        let vehicle_id = self
            .get_vehicle_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        Ok(vs.read_owned().await)
    }
}

/// Marks an id as being created. Released on drop, after the creating event is
/// applied or has failed.
pub(super) struct IdClaim<'a> {
    claims: &'a DashSet<Ulid>,
    id: Ulid,
}

impl<'a> IdClaim<'a> {
    /// `None` if another caller is already creating `id`.
    pub(super) fn take(claims: &'a DashSet<Ulid>, id: Ulid) -> Option<Self> {
        claims.insert(id).then_some(Self { claims, id })
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}
