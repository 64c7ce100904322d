use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::Span;

use super::{EngineError, ValidationError};

pub(crate) fn validate_span(span: &Span) -> Result<(), ValidationError> {
    if span.is_empty() {
        return Err(ValidationError::EmptyInterval(*span));
    }
    Ok(())
}

pub(crate) fn validate_slot(ground: &Ground, slot: u8) -> Result<(), ValidationError> {
    if !ground.has_slot(slot) {
        return Err(ValidationError::SlotOutOfRange {
            slot,
            total: ground.total_slots,
        });
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: Option<&str>) -> Result<(), ValidationError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(ValidationError::TooLong("notes"));
    }
    Ok(())
}

/// First active booking on the ledger overlapping `span`, ignoring `exclude`.
pub(crate) fn first_conflict(ledger: &SlotLedger, span: Span, exclude: Option<Ulid>) -> Option<Ulid> {
    ledger
        .overlapping(span)
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(ledger: &SlotLedger, span: Span, exclude: Option<Ulid>) -> Result<(), EngineError> {
    match first_conflict(ledger, span, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!("conflict on {:?} {span}: overlaps {id}", ledger.key);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

/// Every pair of overlapping active bookings on one ledger, in start order.
pub(crate) fn overlapping_pairs(ledger: &SlotLedger) -> Vec<OverlapReport> {
    let active: Vec<&Booking> = ledger.active().collect();
    let mut pairs = Vec::new();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            // Sorted by start: nothing later can overlap `a` once `b` starts after it ends.
            if b.span.start >= a.span.end {
                break;
            }
            if a.span.overlaps(&b.span) {
                pairs.push(OverlapReport {
                    key: ledger.key,
                    first: a.id,
                    second: b.id,
                });
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeOfDay;
    use chrono::NaiveDate;

    fn key() -> SlotKey {
        SlotKey {
            ground_id: Ulid::new(),
            slot: 1,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    fn booking(key: SlotKey, start: &str, end: &str, status: BookingStatus) -> Booking {
        let span = Span::parse(start, end).unwrap();
        let at = key.date.and_hms_opt(0, 0, 0).unwrap();
        Booking {
            id: Ulid::new(),
            ground_id: key.ground_id,
            slot: key.slot,
            date: key.date,
            span,
            duration_minutes: span.duration_minutes(),
            status,
            booking_type: BookingType::Match,
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
        }
    }

    #[test]
    fn adjacent_is_not_a_conflict() {
        let k = key();
        let mut ledger = SlotLedger::new(k);
        ledger.insert(booking(k, "10:00", "12:00", BookingStatus::Booked));
        assert!(check_no_conflict(&ledger, Span::parse("12:00", "14:00").unwrap(), None).is_ok());
        assert!(check_no_conflict(&ledger, Span::parse("08:00", "10:00").unwrap(), None).is_ok());
    }

    #[test]
    fn overlap_names_the_blocker() {
        let k = key();
        let mut ledger = SlotLedger::new(k);
        let b = booking(k, "10:00", "12:00", BookingStatus::Confirmed);
        let id = b.id;
        ledger.insert(b);
        match check_no_conflict(&ledger, Span::parse("11:00", "13:00").unwrap(), None) {
            Err(EngineError::Conflict(blocker)) => assert_eq!(blocker, id),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn excluded_and_cancelled_are_ignored() {
        let k = key();
        let mut ledger = SlotLedger::new(k);
        let mine = booking(k, "10:00", "12:00", BookingStatus::Booked);
        let mine_id = mine.id;
        ledger.insert(mine);
        ledger.insert(booking(k, "12:00", "14:00", BookingStatus::Cancelled));
        let q = Span::parse("11:00", "13:00").unwrap();
        assert!(check_no_conflict(&ledger, q, Some(mine_id)).is_ok());
        assert_eq!(first_conflict(&ledger, q, None), Some(mine_id));
    }

    #[test]
    fn empty_span_rejected() {
        let t = TimeOfDay::hm(9, 0).unwrap();
        assert_eq!(
            validate_span(&Span::new(t, t)),
            Err(ValidationError::EmptyInterval(Span::new(t, t)))
        );
    }

    #[test]
    fn overlapping_pairs_found() {
        let k = key();
        let mut ledger = SlotLedger::new(k);
        ledger.insert(booking(k, "09:00", "11:00", BookingStatus::Booked));
        ledger.insert(booking(k, "10:00", "12:00", BookingStatus::Booked));
        ledger.insert(booking(k, "12:00", "13:00", BookingStatus::Booked));
        ledger.insert(booking(k, "09:30", "10:30", BookingStatus::Cancelled));
        let pairs = overlapping_pairs(&ledger);
        assert_eq!(pairs.len(), 1);
    }
}
