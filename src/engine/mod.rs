mod attendance;
mod availability;
mod bookings;
mod conflict;
mod error;
mod grounds;
mod queries;
mod recurring;
mod reschedule;

pub use attendance::attendance_allowed;
pub use availability::{AvailabilityGrid, Bucket, SlotAvailability, SlotOpen, bucket_spans, slot_availability};
pub use error::{EngineError, Entity, PolicyError, StateError, ValidationError};
pub use reschedule::program_week;
pub use recurring::OccurrenceOutcome;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::coaching::CoachingDirectory;
use crate::config::SchedulingRules;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedGround = Arc<RwLock<Ground>>;
pub type SharedSlotLedger = Arc<RwLock<SlotLedger>>;

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
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is queued, then does a
/// single fsync for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
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

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine: ground registry, slot-day ledgers and the write paths
/// that keep active bookings on every slot-day pairwise disjoint.
pub struct Engine {
    grounds: DashMap<Ulid, SharedGround>,
    ledgers: DashMap<SlotKey, SharedSlotLedger>,
    /// Booking id → slot-day currently holding it.
    booking_index: DashMap<Ulid, SlotKey>,
    /// Session id → its single active booking.
    session_index: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction takes it exclusively so the
    /// snapshot and the log swap see no writes in between.
    commit_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    coaching: Arc<dyn CoachingDirectory>,
    rules: SchedulingRules,
}

/// Apply a booking event to the ledger holding the booking (caller holds the lock).
fn apply_to_ledger(
    ledger: &mut SlotLedger,
    event: &Event,
    booking_index: &DashMap<Ulid, SlotKey>,
    session_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, ledger.key);
            if let Some(link) = booking.session
                && booking.is_active() {
                    session_index.insert(link.session_id, booking.id);
                }
            ledger.insert(booking.clone());
        }
        Event::BookingConfirmed { id, at } => {
            if let Some(b) = ledger.get_mut(*id) {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(*at);
            }
        }
        Event::BookingCompleted { id, report, at } => {
            if let Some(b) = ledger.get_mut(*id) {
                b.status = BookingStatus::Completed;
                b.completed_at = Some(*at);
                b.ground_report = Some(report.clone());
            }
        }
        Event::BookingCancelled { id, reason, at } => {
            if let Some(b) = ledger.get_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.cancellation = Some(Cancellation {
                    reason: reason.clone(),
                    cancelled_at: *at,
                });
                if let Some(link) = b.session {
                    session_index.remove_if(&link.session_id, |_, v| v == id);
                }
            }
        }
        Event::GroundConditionRecorded { id, report } => {
            if let Some(b) = ledger.get_mut(*id) {
                b.ground_report = Some(report.clone());
            }
        }
        // Reschedules span two ledgers; ground events never touch one.
        Event::BookingRescheduled { .. } | Event::GroundCreated { .. } | Event::GroundUpdated { .. } => {}
    }
}

/// Move a booking to its new slot-day. `to` is `None` when the slot-day is unchanged.
fn apply_reschedule(
    from: &mut SlotLedger,
    to: Option<&mut SlotLedger>,
    event: &Event,
    booking_index: &DashMap<Ulid, SlotKey>,
) {
    let Event::BookingRescheduled {
        id,
        to: target,
        span,
        deadline,
        at,
        ..
    } = *event
    else {
        return;
    };
    let Some(mut booking) = from.remove(id) else { return };
    booking.reschedule = Some(RescheduleRecord {
        previous_date: booking.date,
        previous_span: booking.span,
        previous_slot: booking.slot,
        rescheduled_at: at,
    });
    booking.slot = target.slot;
    booking.date = target.date;
    booking.span = span;
    booking.booking_deadline = deadline;
    booking_index.insert(id, target);
    match to {
        Some(ledger) => ledger.insert(booking),
        None => from.insert(booking),
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        rules: SchedulingRules,
        clock: Arc<dyn Clock>,
        coaching: Arc<dyn CoachingDirectory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            grounds: DashMap::new(),
            ledgers: DashMap::new(),
            booking_index: DashMap::new(),
            session_index: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
            notify: Arc::new(NotifyHub::new()),
            clock,
            coaching,
            rules,
        };

        // We're the sole owner of every lock here, so try_write always succeeds.
        // Never use blocking_write: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!("replayed {} events from {}", events.len(), wal_path.display());
        let active = engine
            .grounds
            .iter()
            .filter(|e| e.value().try_read().is_ok_and(|g| g.active))
            .count();
        metrics::gauge!(crate::observability::GROUNDS_ACTIVE).set(active as f64);

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::GroundCreated { ground } | Event::GroundUpdated { ground } => {
                let existing = self.grounds.get(&ground.id).map(|e| e.value().clone());
                match existing {
                    Some(state) => {
                        let mut guard = state.try_write().expect("replay: uncontended write");
                        *guard = ground.clone();
                    }
                    None => {
                        self.grounds.insert(ground.id, Arc::new(RwLock::new(ground.clone())));
                    }
                }
            }
            Event::BookingCreated { booking } => {
                let ledger = self.ledger(booking.key());
                let mut guard = ledger.try_write().expect("replay: uncontended write");
                apply_to_ledger(&mut guard, event, &self.booking_index, &self.session_index);
            }
            Event::BookingRescheduled { from, to, .. } => {
                let source = self.ledger(*from);
                let mut src = source.try_write().expect("replay: uncontended write");
                if from == to {
                    apply_reschedule(&mut src, None, event, &self.booking_index);
                } else {
                    let target = self.ledger(*to);
                    let mut dst = target.try_write().expect("replay: uncontended write");
                    apply_reschedule(&mut src, Some(&mut *dst), event, &self.booking_index);
                }
            }
            Event::BookingConfirmed { id, .. }
            | Event::BookingCompleted { id, .. }
            | Event::BookingCancelled { id, .. }
            | Event::GroundConditionRecorded { id, .. } => {
                let Some(key) = self.booking_index.get(id).map(|e| *e.value()) else {
                    tracing::warn!("replay: event for unknown booking {id}");
                    return;
                };
                let ledger = self.ledger(key);
                let mut guard = ledger.try_write().expect("replay: uncontended write");
                apply_to_ledger(&mut guard, event, &self.booking_index, &self.session_index);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append + apply + notify for an event confined to one ledger.
    async fn persist_and_apply(
        &self,
        ground_id: Ulid,
        ledger: &mut SlotLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ledger, event, &self.booking_index, &self.session_index);
        self.notify.send(ground_id, event);
        Ok(())
    }

    fn ground_state(&self, id: &Ulid) -> Result<SharedGround, EngineError> {
        self.grounds
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(Entity::Ground, *id))
    }

    /// Ledger for a slot-day, created empty on first use.
    fn ledger(&self, key: SlotKey) -> SharedSlotLedger {
        self.ledgers
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(SlotLedger::new(key))))
            .value()
            .clone()
    }

    /// Read-side lookup that never allocates a ledger.
    fn existing_ledger(&self, key: &SlotKey) -> Option<SharedSlotLedger> {
        self.ledgers.get(key).map(|e| e.value().clone())
    }

    fn booking_key(&self, id: &Ulid) -> Result<SlotKey, EngineError> {
        self.booking_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(Entity::Booking, *id))
    }

    /// Resolve booking → slot-day and take its write lock.
    ///
    /// A reschedule may move the booking between lookup and lock. Bookings
    /// move at most once, so a single re-resolve is enough.
    async fn lock_booking(
        &self,
        id: Ulid,
    ) -> Result<(SlotKey, OwnedRwLockWriteGuard<SlotLedger>), EngineError> {
        for _ in 0..2 {
            let key = self.booking_key(&id)?;
            let guard = self.ledger(key).write_owned().await;
            if guard.contains(id) {
                return Ok((key, guard));
            }
        }
        Err(EngineError::NotFound(Entity::Booking, id))
    }

    async fn lock_booking_read(
        &self,
        id: Ulid,
    ) -> Result<(SlotKey, OwnedRwLockReadGuard<SlotLedger>), EngineError> {
        for _ in 0..2 {
            let key = self.booking_key(&id)?;
            let guard = self.ledger(key).read_owned().await;
            if guard.contains(id) {
                return Ok((key, guard));
            }
        }
        Err(EngineError::NotFound(Entity::Booking, id))
    }

    pub fn rules(&self) -> &SchedulingRules {
        &self.rules
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Compact the WAL to one snapshot event per ground and booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let grounds: Vec<SharedGround> = self.grounds.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(grounds.len());
        for g in grounds {
            snapshots.push(g.read().await.clone());
        }
        snapshots.sort_by_key(|g| (g.created_at, g.id));

        let mut events: Vec<Event> = snapshots
            .into_iter()
            .map(|ground| Event::GroundCreated { ground })
            .collect();

        let mut ledgers: Vec<(SlotKey, SharedSlotLedger)> = self
            .ledgers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        ledgers.sort_by_key(|(k, _)| *k);
        for (_, ledger) in ledgers {
            let guard = ledger.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
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
        tracing::info!("WAL compacted to {count} events");
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
