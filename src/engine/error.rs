use chrono::{NaiveDate, NaiveDateTime, Weekday};
use thiserror::Error;
use ulid::Ulid;

use crate::model::BookingStatus;
use crate::time::{Span, TimeOfDay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Ground,
    Booking,
    Session,
    Enrollment,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Ground => "ground",
            Entity::Booking => "booking",
            Entity::Session => "session",
            Entity::Enrollment => "enrollment",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found: {1}")]
    NotFound(Entity, Ulid),
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("slot unavailable: overlaps booking {0}")]
    Conflict(Ulid),
    #[error("illegal transition: {0}")]
    State(#[from] StateError),
    #[error("rejected: {0}")]
    Policy(#[from] PolicyError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("slot {slot} outside 1..={total}")]
    SlotOutOfRange { slot: u8, total: u8 },
    #[error("total slots must be between 1 and {max}, got {got}")]
    InvalidSlotCount { got: u8, max: u8 },
    #[error("cannot shrink to {total} slots: booking {booking} holds slot {slot}")]
    SlotsInUse { total: u8, slot: u8, booking: Ulid },
    #[error("interval {0} is empty")]
    EmptyInterval(Span),
    #[error("interval starting {start} with {minutes} minutes runs past midnight")]
    RunsPastMidnight { start: TimeOfDay, minutes: u32 },
    #[error("ground {0} is deactivated")]
    GroundInactive(Ulid),
    #[error("start {0} is in the past")]
    StartInPast(NaiveDateTime),
    #[error("deadline {deadline} is after the start {start}")]
    DeadlineAfterStart { deadline: NaiveDateTime, start: NaiveDateTime },
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} too long")]
    TooLong(&'static str),
    #[error("booking {0} is not linked to a coaching session")]
    NotSessionBooking(Ulid),
    #[error("program weeks are numbered from 1")]
    WeekNumberZero,
    #[error("session bookings cannot recur")]
    RecurringSession,
    #[error("{0}")]
    Recurrence(&'static str),
    #[error("availability policy: {0}")]
    Policy(&'static str),
    #[error("date range {from}..={to} is reversed")]
    ReversedRange { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot {action} booking {id} while {from}")]
    Transition {
        id: Ulid,
        from: BookingStatus,
        action: &'static str,
    },
    #[error("booking {0} has already been rescheduled once")]
    AlreadyRescheduled(Ulid),
    #[error("session {session} already occupies booking {booking}")]
    SessionAlreadyBooked { session: Ulid, booking: Ulid },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("attendance already marked for session {0}")]
    AttendanceMarked(Ulid),
    #[error("new start {start} is less than {hours}h away")]
    InsufficientNotice { start: NaiveDateTime, hours: i64 },
    #[error("{date} is outside program week {week_start}..={week_end}")]
    OutsideSchedulingWeek {
        date: NaiveDate,
        week_start: NaiveDate,
        week_end: NaiveDate,
    },
    #[error("coach {coach} is unavailable on {weekday} for {span}")]
    CoachUnavailable { coach: Ulid, weekday: Weekday, span: Span },
    #[error("cancellation closed at {0}")]
    CancellationWindowClosed(NaiveDateTime),
    #[error("session on {0} has not happened yet")]
    FutureAttendance(NaiveDate),
}
