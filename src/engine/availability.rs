use chrono::{NaiveDate, NaiveDateTime, Timelike};
use futures::future::try_join_all;
use serde::Serialize;
use ulid::Ulid;

use crate::config::AvailabilityPolicy;
use crate::limits::MAX_AVAILABILITY_DAYS;
use crate::model::*;
use crate::observability::AVAILABILITY_DURATION_SECONDS;
use crate::time::{Span, TimeOfDay, merge_overlapping, subtract_intervals};

use super::conflict::{first_conflict, validate_slot, validate_span};
use super::{Engine, EngineError, ValidationError};

// ── Availability Algorithm ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub span: Span,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub slot: u8,
    pub buckets: Vec<Bucket>,
    /// Maximal bookable windows inside operating hours.
    pub free: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityGrid {
    pub ground_id: Ulid,
    pub date: NaiveDate,
    pub slots: Vec<SlotAvailability>,
}

impl AvailabilityGrid {
    /// Slots whose bucket covering `span` is open.
    pub fn open_slots_for(&self, span: &Span) -> Vec<u8> {
        self.slots
            .iter()
            .filter(|s| s.buckets.iter().any(|b| b.available && b.span == *span))
            .map(|s| s.slot)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotOpen {
    pub slot: u8,
    pub open: bool,
}

/// Full-width buckets from opening time. A trailing partial bucket is dropped.
pub fn bucket_spans(policy: &AvailabilityPolicy) -> Vec<Span> {
    let mut spans = Vec::new();
    let step = u32::from(policy.granularity_minutes);
    if step == 0 {
        return spans;
    }
    let mut start = policy.open;
    while let Some(end) = start.checked_add_minutes(step) {
        if end > policy.close {
            break;
        }
        spans.push(Span::new(start, end));
        start = end;
    }
    spans
}

/// Earliest bookable start on `date` given the current instant, or `None`
/// if the whole day is already behind us.
fn earliest_start(date: NaiveDate, now: NaiveDateTime) -> Option<TimeOfDay> {
    if date > now.date() {
        return Some(TimeOfDay::MIDNIGHT);
    }
    if date < now.date() {
        return None;
    }
    // Starts must be strictly after `now`.
    let minute = now.time().num_seconds_from_midnight() / 60 + 1;
    u16::try_from(minute).ok().and_then(TimeOfDay::from_minutes)
}

/// Availability of one slot on one date.
///
/// A bucket is available only when the ground takes bookings, the ledger is
/// below its booking cap, the bucket starts after `now`, and no active
/// booking on the ledger overlaps it.
pub fn slot_availability(
    slot: u8,
    date: NaiveDate,
    ledger: Option<&SlotLedger>,
    policy: &AvailabilityPolicy,
    now: NaiveDateTime,
    accepting: bool,
) -> SlotAvailability {
    let accepting = accepting && ledger.is_none_or(|l| !l.is_full());
    let earliest = if accepting { earliest_start(date, now) } else { None };

    let buckets = bucket_spans(policy)
        .into_iter()
        .map(|span| {
            let available = earliest.is_some_and(|e| span.start >= e)
                && ledger.is_none_or(|l| first_conflict(l, span, None).is_none());
            Bucket { span, available }
        })
        .collect();

    let free = match earliest {
        Some(e) if e.max(policy.open) < policy.close => {
            let window = [Span::new(e.max(policy.open), policy.close)];
            let taken: Vec<Span> = ledger
                .map(|l| l.active().map(|b| b.span).collect())
                .unwrap_or_default();
            subtract_intervals(&window, &merge_overlapping(&taken))
        }
        _ => Vec::new(),
    };

    SlotAvailability { slot, buckets, free }
}

impl Engine {
    /// Per-slot bucket grid for one ground on one date.
    pub async fn availability(
        &self,
        ground_id: Ulid,
        date: NaiveDate,
        policy: &AvailabilityPolicy,
    ) -> Result<AvailabilityGrid, EngineError> {
        policy.validate().map_err(ValidationError::Policy)?;
        let started = std::time::Instant::now();

        let ground = self.get_ground(ground_id).await?;
        let now = self.clock.now();
        let mut slots = Vec::with_capacity(usize::from(ground.total_slots));
        for slot in 1..=ground.total_slots {
            let key = SlotKey { ground_id, slot, date };
            let row = match self.existing_ledger(&key) {
                Some(ledger) => {
                    let guard = ledger.read().await;
                    slot_availability(slot, date, Some(&*guard), policy, now, ground.active)
                }
                None => slot_availability(slot, date, None, policy, now, ground.active),
            };
            slots.push(row);
        }

        metrics::histogram!(AVAILABILITY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(AvailabilityGrid { ground_id, date, slots })
    }

    /// One grid per day over an inclusive date range, computed concurrently.
    pub async fn availability_range(
        &self,
        ground_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        policy: &AvailabilityPolicy,
    ) -> Result<Vec<AvailabilityGrid>, EngineError> {
        if to < from {
            return Err(ValidationError::ReversedRange { from, to }.into());
        }
        if (to - from).num_days() >= MAX_AVAILABILITY_DAYS {
            return Err(EngineError::LimitExceeded("availability range too wide"));
        }
        let days = from.iter_days().take_while(|d| *d <= to);
        try_join_all(days.map(|date| self.availability(ground_id, date, policy))).await
    }

    /// For an exact interval, whether each slot of the ground could take it.
    pub async fn open_slots(&self, ground_id: Ulid, date: NaiveDate, span: Span) -> Result<Vec<SlotOpen>, EngineError> {
        validate_span(&span)?;
        let ground = self.get_ground(ground_id).await?;
        let now = self.clock.now();
        let bookable = ground.active && span.start.on(date) > now;

        let mut out = Vec::with_capacity(usize::from(ground.total_slots));
        for slot in 1..=ground.total_slots {
            let free = match self.existing_ledger(&SlotKey { ground_id, slot, date }) {
                Some(ledger) => {
                    let guard = ledger.read().await;
                    !guard.is_full() && first_conflict(&guard, span, None).is_none()
                }
                None => true,
            };
            out.push(SlotOpen {
                slot,
                open: bookable && free,
            });
        }
        Ok(out)
    }

    /// True if `span` is free on the slot-day, ignoring `exclude`.
    /// Does not consider whether the ground is active or the start has passed.
    pub async fn is_slot_available(
        &self,
        ground_id: Ulid,
        slot: u8,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_span(&span)?;
        let ground = self.get_ground(ground_id).await?;
        validate_slot(&ground, slot)?;
        match self.existing_ledger(&SlotKey { ground_id, slot, date }) {
            Some(ledger) => Ok(first_conflict(&*ledger.read().await, span, exclude).is_none()),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::parse(a, b).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn day_before() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 9).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn ledger_with(spans: &[(&str, &str, BookingStatus)]) -> SlotLedger {
        let key = SlotKey {
            ground_id: Ulid::new(),
            slot: 1,
            date: date(),
        };
        let mut ledger = SlotLedger::new(key);
        for (a, b, status) in spans {
            let s = span(a, b);
            let at = day_before();
            ledger.insert(Booking {
                id: Ulid::new(),
                ground_id: key.ground_id,
                slot: 1,
                date: key.date,
                span: s,
                duration_minutes: s.duration_minutes(),
                status: *status,
                booking_type: BookingType::Practice,
                price: 0,
                payment_status: PaymentStatus::Pending,
                session: None,
                recurrence: None,
                reschedule: None,
                booking_deadline: at,
                cancellation: None,
                confirmed_at: None,
                completed_at: None,
                ground_report: None,
                notes: None,
                created_at: at,
            });
        }
        ledger
    }

    #[test]
    fn ground_only_buckets() {
        let spans = bucket_spans(&AvailabilityPolicy::ground_only());
        assert_eq!(spans.len(), 8);
        assert_eq!(spans[0], span("06:00", "08:00"));
        assert_eq!(spans[7], span("20:00", "22:00"));
    }

    #[test]
    fn partial_trailing_bucket_dropped() {
        let policy = AvailabilityPolicy {
            open: t("08:00"),
            close: t("13:00"),
            granularity_minutes: 120,
        };
        assert_eq!(
            bucket_spans(&policy),
            vec![span("08:00", "10:00"), span("10:00", "12:00")]
        );
    }

    #[test]
    fn booking_blocks_every_overlapping_bucket() {
        let ledger = ledger_with(&[("09:00", "11:00", BookingStatus::Booked)]);
        let row = slot_availability(
            1,
            date(),
            Some(&ledger),
            &AvailabilityPolicy::combined(),
            day_before(),
            true,
        );
        let closed: Vec<Span> = row.buckets.iter().filter(|b| !b.available).map(|b| b.span).collect();
        assert_eq!(closed, vec![span("09:00", "10:00"), span("10:00", "11:00")]);
        assert_eq!(row.free, vec![span("08:00", "09:00"), span("11:00", "20:00")]);
    }

    #[test]
    fn cancelled_bookings_free_their_buckets() {
        let ledger = ledger_with(&[("09:00", "11:00", BookingStatus::Cancelled)]);
        let row = slot_availability(
            1,
            date(),
            Some(&ledger),
            &AvailabilityPolicy::combined(),
            day_before(),
            true,
        );
        assert!(row.buckets.iter().all(|b| b.available));
        assert_eq!(row.free, vec![span("08:00", "20:00")]);
    }

    #[test]
    fn past_buckets_are_closed() {
        let now = date().and_hms_opt(10, 30, 0).unwrap();
        let row = slot_availability(1, date(), None, &AvailabilityPolicy::combined(), now, true);
        let open: Vec<Span> = row.buckets.iter().filter(|b| b.available).map(|b| b.span).collect();
        assert_eq!(open.first(), Some(&span("11:00", "12:00")));
        assert_eq!(row.free, vec![span("10:31", "20:00")]);

        let tomorrow = date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap();
        let row = slot_availability(1, date(), None, &AvailabilityPolicy::combined(), tomorrow, true);
        assert!(row.buckets.iter().all(|b| !b.available));
        assert!(row.free.is_empty());
    }

    #[test]
    fn inactive_ground_is_fully_closed() {
        let row = slot_availability(1, date(), None, &AvailabilityPolicy::combined(), day_before(), false);
        assert!(row.buckets.iter().all(|b| !b.available));
        assert!(row.free.is_empty());
    }
}
