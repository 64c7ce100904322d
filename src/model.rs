use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_SLOT_DAY;
use crate::recurrence::Frequency;
use crate::time::{Span, TimeOfDay};

/// Price in the smallest currency unit.
pub type Money = u64;

/// A bookable facility split into `total_slots` independent slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ground {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub price_per_slot: Money,
    pub total_slots: u8,
    pub facilities: Vec<String>,
    pub equipment: Vec<String>,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

impl Ground {
    pub fn has_slot(&self, slot: u8) -> bool {
        (1..=self.total_slots).contains(&slot)
    }

    /// Price for an interval: one `price_per_slot` per started hour.
    pub fn price_for(&self, duration_minutes: u32) -> Money {
        let hours = u64::from(duration_minutes.div_ceil(60));
        self.price_per_slot.saturating_mul(hours)
    }
}

/// Identity of one lockable booking set: a ground slot on a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub ground_id: Ulid,
    pub slot: u8,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Booked,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Counts against the no-overlap invariant.
    pub fn is_active(self) -> bool {
        self != BookingStatus::Cancelled
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingType {
    Session,
    Practice,
    Match,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundCondition {
    Excellent,
    Good,
    Fair,
    Poor,
    NeedsMaintenance,
}

/// Post-use inspection of the ground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundReport {
    pub condition: GroundCondition,
    pub notes: Option<String>,
}

/// Link from a booking to the coaching session that originated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLink {
    pub session_id: Ulid,
    pub enrollment_id: Ulid,
    /// 1-based program week the session belongs to.
    pub week_number: u32,
    pub coach_id: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceInfo {
    pub series_id: Ulid,
    /// 0-based position within the series.
    pub index: u32,
    pub frequency: Frequency,
}

/// Where a booking was before its one allowed reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRecord {
    pub previous_date: NaiveDate,
    pub previous_span: Span,
    pub previous_slot: u8,
    pub rescheduled_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub ground_id: Ulid,
    pub slot: u8,
    pub date: NaiveDate,
    pub span: Span,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub booking_type: BookingType,
    pub price: Money,
    pub payment_status: PaymentStatus,
    pub session: Option<SessionLink>,
    pub recurrence: Option<RecurrenceInfo>,
    pub reschedule: Option<RescheduleRecord>,
    /// Cancellation is allowed strictly before this instant.
    pub booking_deadline: NaiveDateTime,
    pub cancellation: Option<Cancellation>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub ground_report: Option<GroundReport>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Booking {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            ground_id: self.ground_id,
            slot: self.slot,
            date: self.date,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn rescheduled(&self) -> bool {
        self.reschedule.is_some()
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.span.start.on(self.date)
    }

    pub fn start(&self) -> TimeOfDay {
        self.span.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.span.end
    }
}

/// Every booking ever placed on one slot-day, sorted by start.
/// Cancelled bookings stay for history but never count as conflicts.
#[derive(Debug, Clone)]
pub struct SlotLedger {
    pub key: SlotKey,
    pub bookings: Vec<Booking>,
}

impl SlotLedger {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start time.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.get(id).is_some()
    }

    pub fn active(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// At the booking cap. A full slot-day takes no new bookings, so
    /// availability reports it closed.
    pub fn is_full(&self) -> bool {
        self.active_count() >= MAX_BOOKINGS_PER_SLOT_DAY
    }

    /// Active bookings overlapping `query`.
    /// Bookings starting at or after `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.is_active() && b.span.overlaps(&query))
    }
}

/// Input for a single booking (and the template for a recurring series).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub ground_id: Ulid,
    pub slot: u8,
    pub date: NaiveDate,
    pub span: Span,
    pub booking_type: BookingType,
    pub session: Option<SessionLink>,
    /// Overrides the default `start - cancellation lead`.
    pub booking_deadline: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

impl NewBooking {
    pub fn new(ground_id: Ulid, slot: u8, date: NaiveDate, span: Span, booking_type: BookingType) -> Self {
        Self {
            ground_id,
            slot,
            date,
            span,
            booking_type,
            session: None,
            booking_deadline: None,
            notes: None,
        }
    }

    pub fn with_session(mut self, session: SessionLink) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_deadline(mut self, deadline: NaiveDateTime) -> Self {
        self.booking_deadline = Some(deadline);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub slot: u8,
}

/// Input for registering a ground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGround {
    pub name: String,
    pub location: String,
    pub price_per_slot: Money,
    pub total_slots: u8,
    pub facilities: Vec<String>,
    pub equipment: Vec<String>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    pub price_per_slot: Option<Money>,
    pub total_slots: Option<u8>,
    pub facilities: Option<Vec<String>>,
    pub equipment: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroundSort {
    #[default]
    Name,
    PricePerSlot,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundQuery {
    pub sort: GroundSort,
    pub descending: bool,
    pub offset: usize,
    pub limit: usize,
    pub include_inactive: bool,
}

impl Default for GroundQuery {
    fn default() -> Self {
        Self {
            sort: GroundSort::Name,
            descending: false,
            offset: 0,
            limit: 20,
            include_inactive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundPage {
    pub items: Vec<Ground>,
    pub total: usize,
}

/// One entry in the booking journal. Each variant is a single mutation and
/// carries everything replay needs, so applying the log never consults the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GroundCreated {
        ground: Ground,
    },
    GroundUpdated {
        ground: Ground,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        at: NaiveDateTime,
    },
    BookingCompleted {
        id: Ulid,
        report: GroundReport,
        at: NaiveDateTime,
    },
    BookingCancelled {
        id: Ulid,
        reason: String,
        at: NaiveDateTime,
    },
    BookingRescheduled {
        id: Ulid,
        from: SlotKey,
        to: SlotKey,
        span: Span,
        /// Cancellation deadline moved along with the start.
        deadline: NaiveDateTime,
        at: NaiveDateTime,
    },
    GroundConditionRecorded {
        id: Ulid,
        report: GroundReport,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Two active bookings on the same slot-day whose intervals overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlapReport {
    pub key: SlotKey,
    pub first: Ulid,
    pub second: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSummary {
    pub grounds: usize,
    pub active_grounds: usize,
    pub bookings: usize,
    pub active_bookings: usize,
}
