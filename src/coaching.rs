//! Seam to the coaching subsystem: enrollments, session attendance and coach
//! weekly availability live there, not in the booking engine.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use dashmap::DashMap;
use ulid::Ulid;

use crate::time::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub participant_id: Ulid,
    pub attended: bool,
    pub marked_at: Option<NaiveDateTime>,
}

impl AttendanceRecord {
    /// Any recorded attendance decision, present or absent, counts as marked.
    pub fn is_marked(&self) -> bool {
        self.attended || self.marked_at.is_some()
    }
}

/// A coach's recurring weekly windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklyAvailability {
    windows: HashMap<Weekday, Vec<Span>>,
}

impl WeeklyAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, day: Weekday, window: Span) -> Self {
        self.windows.entry(day).or_default().push(window);
        self
    }

    pub fn windows(&self, day: Weekday) -> &[Span] {
        self.windows.get(&day).map_or(&[], Vec::as_slice)
    }

    /// True if `span` fits entirely inside a single window on `day`.
    pub fn covers(&self, day: Weekday, span: &Span) -> bool {
        self.windows(day).iter().any(|w| w.contains_span(span))
    }
}

#[async_trait]
pub trait CoachingDirectory: Send + Sync {
    /// Creation date of the enrollment, which anchors its program weeks.
    async fn enrollment_started_on(&self, enrollment_id: Ulid) -> Option<NaiveDate>;

    async fn session_attendance(&self, session_id: Ulid) -> Vec<AttendanceRecord>;

    /// `None` means the coach keeps no availability table.
    async fn coach_availability(&self, coach_id: Ulid) -> Option<WeeklyAvailability>;

    async fn record_attendance(&self, session_id: Ulid, participant_id: Ulid, attended: bool, at: NaiveDateTime);
}

/// Directory held in process memory. Backs tests and offline tooling.
#[derive(Default)]
pub struct InMemoryCoaching {
    enrollments: DashMap<Ulid, NaiveDate>,
    attendance: DashMap<Ulid, Vec<AttendanceRecord>>,
    coaches: DashMap<Ulid, WeeklyAvailability>,
}

impl InMemoryCoaching {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_enrollment(&self, enrollment_id: Ulid, started_on: NaiveDate) {
        self.enrollments.insert(enrollment_id, started_on);
    }

    pub fn set_coach_availability(&self, coach_id: Ulid, availability: WeeklyAvailability) {
        self.coaches.insert(coach_id, availability);
    }
}

#[async_trait]
impl CoachingDirectory for InMemoryCoaching {
    async fn enrollment_started_on(&self, enrollment_id: Ulid) -> Option<NaiveDate> {
        self.enrollments.get(&enrollment_id).map(|e| *e.value())
    }

    async fn session_attendance(&self, session_id: Ulid) -> Vec<AttendanceRecord> {
        self.attendance
            .get(&session_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    async fn coach_availability(&self, coach_id: Ulid) -> Option<WeeklyAvailability> {
        self.coaches.get(&coach_id).map(|e| e.value().clone())
    }

    async fn record_attendance(&self, session_id: Ulid, participant_id: Ulid, attended: bool, at: NaiveDateTime) {
        let mut records = self.attendance.entry(session_id).or_default();
        let record = AttendanceRecord {
            participant_id,
            attended,
            marked_at: Some(at),
        };
        match records.iter_mut().find(|r| r.participant_id == participant_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(a: &str, b: &str) -> Span {
        Span::parse(a, b).unwrap()
    }

    #[test]
    fn covers_requires_single_window() {
        let avail = WeeklyAvailability::new()
            .with_window(Weekday::Mon, span("08:00", "10:00"))
            .with_window(Weekday::Mon, span("10:00", "12:00"));
        assert!(avail.covers(Weekday::Mon, &span("08:30", "10:00")));
        // Straddles two windows: not inside either one.
        assert!(!avail.covers(Weekday::Mon, &span("09:00", "11:00")));
        assert!(!avail.covers(Weekday::Tue, &span("08:30", "09:00")));
    }

    #[tokio::test]
    async fn record_attendance_replaces_previous_mark() {
        let dir = InMemoryCoaching::new();
        let session = Ulid::new();
        let player = Ulid::new();
        let at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert!(dir.session_attendance(session).await.is_empty());

        dir.record_attendance(session, player, false, at).await;
        dir.record_attendance(session, player, true, at).await;
        let records = dir.session_attendance(session).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].attended);
        assert!(records[0].is_marked());
    }
}
