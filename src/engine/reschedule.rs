use chrono::{Datelike, Duration, NaiveDate};
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{RESCHEDULES_TOTAL, reschedule_outcome};
use crate::time::Span;

use super::conflict::check_no_conflict;
use super::{
    Engine, EngineError, Entity, PolicyError, StateError, ValidationError, apply_reschedule,
};

/// Inclusive date range of a 1-based program week.
pub fn program_week(enrolled_on: NaiveDate, week_number: u32) -> (NaiveDate, NaiveDate) {
    let start = enrolled_on + Duration::days(7 * i64::from(week_number.saturating_sub(1)));
    (start, start + Duration::days(6))
}

impl Engine {
    /// Move a session booking to a new date, start and slot, keeping its
    /// duration. A booking can be rescheduled once.
    pub async fn reschedule_booking(&self, id: Ulid, req: RescheduleRequest) -> Result<Booking, EngineError> {
        let result = self.try_reschedule(id, req).await;
        metrics::counter!(RESCHEDULES_TOTAL, "outcome" => reschedule_outcome(&result)).increment(1);
        match &result {
            Ok(b) => tracing::info!("booking {id} rescheduled to {} slot {} {}", b.date, b.slot, b.span),
            Err(e) => tracing::debug!("reschedule of {id} refused: {e}"),
        }
        result
    }

    async fn try_reschedule(&self, id: Ulid, req: RescheduleRequest) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        // Same retry bound as lock_booking: the booking moves at most once.
        for _ in 0..2 {
            let from = self.booking_key(&id)?;
            let ground = self.ground_state(&from.ground_id)?.read_owned().await;
            let to = SlotKey {
                ground_id: from.ground_id,
                slot: req.slot,
                date: req.date,
            };
            let target_in_range = ground.has_slot(req.slot);

            let (mut src, mut dst) = if target_in_range && to != from {
                self.lock_pair(from, to).await
            } else {
                (self.ledger(from).write_owned().await, None)
            };
            if !src.contains(id) {
                continue;
            }

            return self
                .reschedule_locked(&ground, &mut src, dst.as_deref_mut(), target_in_range, id, req)
                .await;
        }
        Err(EngineError::NotFound(Entity::Booking, id))
    }

    /// Write-lock two distinct ledgers in key order. Returns `(from, to)`.
    async fn lock_pair(
        &self,
        from: SlotKey,
        to: SlotKey,
    ) -> (OwnedRwLockWriteGuard<SlotLedger>, Option<OwnedRwLockWriteGuard<SlotLedger>>) {
        if from < to {
            let a = self.ledger(from).write_owned().await;
            let b = self.ledger(to).write_owned().await;
            (a, Some(b))
        } else {
            let b = self.ledger(to).write_owned().await;
            let a = self.ledger(from).write_owned().await;
            (a, Some(b))
        }
    }

    /// Checks run in a fixed order so callers see the most fundamental refusal first.
    async fn reschedule_locked(
        &self,
        ground: &Ground,
        src: &mut SlotLedger,
        mut dst: Option<&mut SlotLedger>,
        target_in_range: bool,
        id: Ulid,
        req: RescheduleRequest,
    ) -> Result<Booking, EngineError> {
        let booking = src.get(id).cloned().ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if booking.status.is_terminal() {
            return Err(StateError::Transition {
                id,
                from: booking.status,
                action: "reschedule",
            }
            .into());
        }
        let link = booking.session.ok_or(ValidationError::NotSessionBooking(id))?;

        // Read under the ledger lock: a mark landing after this waits for us.
        let attendance = self.coaching.session_attendance(link.session_id).await;
        if attendance.iter().any(|a| a.is_marked()) {
            return Err(PolicyError::AttendanceMarked(link.session_id).into());
        }

        let now = self.clock.now();
        let new_start = req.start.on(req.date);
        if new_start - now <= self.rules.reschedule_notice {
            return Err(PolicyError::InsufficientNotice {
                start: new_start,
                hours: self.rules.reschedule_notice.num_hours(),
            }
            .into());
        }

        if booking.rescheduled() {
            return Err(StateError::AlreadyRescheduled(id).into());
        }

        if !target_in_range {
            return Err(ValidationError::SlotOutOfRange {
                slot: req.slot,
                total: ground.total_slots,
            }
            .into());
        }
        if !ground.active {
            return Err(ValidationError::GroundInactive(ground.id).into());
        }
        let end = req
            .start
            .checked_add_minutes(booking.duration_minutes)
            .ok_or(ValidationError::RunsPastMidnight {
                start: req.start,
                minutes: booking.duration_minutes,
            })?;
        let span = Span::new(req.start, end);

        let enrolled_on = self
            .coaching
            .enrollment_started_on(link.enrollment_id)
            .await
            .ok_or(EngineError::NotFound(Entity::Enrollment, link.enrollment_id))?;
        let (week_start, week_end) = program_week(enrolled_on, link.week_number);
        if req.date < week_start || req.date > week_end {
            return Err(PolicyError::OutsideSchedulingWeek {
                date: req.date,
                week_start,
                week_end,
            }
            .into());
        }

        if let Some(coach) = link.coach_id
            && let Some(table) = self.coaching.coach_availability(coach).await
            && !table.covers(req.date.weekday(), &span)
        {
            return Err(PolicyError::CoachUnavailable {
                coach,
                weekday: req.date.weekday(),
                span,
            }
            .into());
        }

        let target_ledger: &SlotLedger = match &dst {
            Some(d) => &**d,
            None => &*src,
        };
        if dst.is_some() && target_ledger.is_full() {
            return Err(EngineError::LimitExceeded("too many bookings on slot-day"));
        }
        check_no_conflict(target_ledger, span, Some(id))?;

        let to = SlotKey {
            ground_id: ground.id,
            slot: req.slot,
            date: req.date,
        };
        // Keep the booking's cancellation lead relative to its new start.
        let deadline = new_start - (booking.starts_at() - booking.booking_deadline);
        let event = Event::BookingRescheduled {
            id,
            from: booking.key(),
            to,
            span,
            deadline,
            at: now,
        };
        self.wal_append(&event).await?;
        apply_reschedule(src, dst.as_deref_mut(), &event, &self.booking_index);
        self.notify.send(ground.id, &event);

        let holder: &SlotLedger = match dst {
            Some(d) => d,
            None => src,
        };
        holder.get(id).cloned().ok_or(EngineError::NotFound(Entity::Booking, id))
    }
}
