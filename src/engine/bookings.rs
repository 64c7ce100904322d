use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL};

use super::conflict::{check_no_conflict, validate_notes, validate_slot, validate_span};
use super::{Engine, EngineError, Entity, PolicyError, StateError, ValidationError};

impl Engine {
    /// Place a single booking. Commits only if the interval is free on the
    /// slot-day; the check and the write happen under one ledger lock.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let booking = self.create_booking_with(req, None).await?;
        metrics::counter!(BOOKINGS_CREATED_TOTAL, "source" => "single").increment(1);
        Ok(booking)
    }

    pub(super) async fn create_booking_with(
        &self,
        req: NewBooking,
        recurrence: Option<RecurrenceInfo>,
    ) -> Result<Booking, EngineError> {
        validate_span(&req.span)?;
        validate_notes(req.notes.as_deref())?;
        if let Some(link) = req.session
            && link.week_number == 0 {
                return Err(ValidationError::WeekNumberZero.into());
            }

        let _gate = self.commit_gate.read().await;
        let ground = self.ground_state(&req.ground_id)?.read_owned().await;
        if !ground.active {
            return Err(ValidationError::GroundInactive(ground.id).into());
        }
        validate_slot(&ground, req.slot)?;

        let now = self.clock.now();
        let starts_at = req.span.start.on(req.date);
        if starts_at <= now {
            return Err(ValidationError::StartInPast(starts_at).into());
        }
        let booking_deadline = req
            .booking_deadline
            .unwrap_or(starts_at - self.rules.cancellation_lead);
        if booking_deadline > starts_at {
            return Err(ValidationError::DeadlineAfterStart {
                deadline: booking_deadline,
                start: starts_at,
            }
            .into());
        }

        let key = SlotKey {
            ground_id: req.ground_id,
            slot: req.slot,
            date: req.date,
        };
        let mut ledger = self.ledger(key).write_owned().await;
        if ledger.is_full() {
            return Err(EngineError::LimitExceeded("too many bookings on slot-day"));
        }
        check_no_conflict(&ledger, req.span, None)?;

        let id = Ulid::new();
        // Reserve the session before the WAL write so two slot-days can't both claim it.
        if let Some(link) = req.session {
            let holder = *self.session_index.entry(link.session_id).or_insert(id);
            if holder != id {
                return Err(StateError::SessionAlreadyBooked {
                    session: link.session_id,
                    booking: holder,
                }
                .into());
            }
        }

        let duration_minutes = req.span.duration_minutes();
        let booking = Booking {
            id,
            ground_id: req.ground_id,
            slot: req.slot,
            date: req.date,
            span: req.span,
            duration_minutes,
            status: BookingStatus::Booked,
            booking_type: req.booking_type,
            price: ground.price_for(duration_minutes),
            payment_status: PaymentStatus::Pending,
            session: req.session,
            recurrence,
            reschedule: None,
            booking_deadline,
            cancellation: None,
            confirmed_at: None,
            completed_at: None,
            ground_report: None,
            notes: req.notes,
            created_at: now,
        };

        let event = Event::BookingCreated { booking: booking.clone() };
        if let Err(e) = self.persist_and_apply(ground.id, &mut ledger, &event).await {
            if let Some(link) = req.session {
                self.session_index.remove_if(&link.session_id, |_, v| *v == id);
            }
            return Err(e);
        }
        tracing::info!("booking {id} on {:?} {}", key, booking.span);
        Ok(booking)
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (key, mut ledger) = self.lock_booking(id).await?;
        let status = ledger
            .get(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if status != BookingStatus::Booked {
            return Err(StateError::Transition {
                id,
                from: status,
                action: "confirm",
            }
            .into());
        }

        let event = Event::BookingConfirmed { id, at: self.clock.now() };
        self.persist_and_apply(key.ground_id, &mut ledger, &event).await?;
        Self::snapshot(&ledger, id)
    }

    /// Close out a played booking with its post-use ground report.
    pub async fn complete_booking(&self, id: Ulid, report: GroundReport) -> Result<Booking, EngineError> {
        validate_notes(report.notes.as_deref())?;
        let _gate = self.commit_gate.read().await;
        let (key, mut ledger) = self.lock_booking(id).await?;
        let status = ledger
            .get(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if status.is_terminal() {
            return Err(StateError::Transition {
                id,
                from: status,
                action: "complete",
            }
            .into());
        }

        let event = Event::BookingCompleted {
            id,
            report,
            at: self.clock.now(),
        };
        self.persist_and_apply(key.ground_id, &mut ledger, &event).await?;
        Self::snapshot(&ledger, id)
    }

    /// Cancel before the booking deadline. Frees the interval immediately.
    pub async fn cancel_booking(&self, id: Ulid, reason: &str) -> Result<Booking, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::Empty("cancellation reason").into());
        }
        if reason.len() > MAX_NOTES_LEN {
            return Err(ValidationError::TooLong("cancellation reason").into());
        }

        let _gate = self.commit_gate.read().await;
        let (key, mut ledger) = self.lock_booking(id).await?;
        let (status, deadline) = ledger
            .get(id)
            .map(|b| (b.status, b.booking_deadline))
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if status.is_terminal() {
            return Err(StateError::Transition {
                id,
                from: status,
                action: "cancel",
            }
            .into());
        }
        let now = self.clock.now();
        if now >= deadline {
            return Err(PolicyError::CancellationWindowClosed(deadline).into());
        }

        let event = Event::BookingCancelled {
            id,
            reason: reason.to_string(),
            at: now,
        };
        self.persist_and_apply(key.ground_id, &mut ledger, &event).await?;
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!("booking {id} cancelled");
        Self::snapshot(&ledger, id)
    }

    /// Attach or replace the ground report. Allowed in every status.
    pub async fn record_ground_condition(&self, id: Ulid, report: GroundReport) -> Result<Booking, EngineError> {
        validate_notes(report.notes.as_deref())?;
        let _gate = self.commit_gate.read().await;
        let (key, mut ledger) = self.lock_booking(id).await?;
        let event = Event::GroundConditionRecorded { id, report };
        self.persist_and_apply(key.ground_id, &mut ledger, &event).await?;
        Self::snapshot(&ledger, id)
    }

    fn snapshot(ledger: &SlotLedger, id: Ulid) -> Result<Booking, EngineError> {
        ledger
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }
}
