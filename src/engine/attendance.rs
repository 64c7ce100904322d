use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use super::{Engine, EngineError, Entity, PolicyError};

/// Attendance may be taken on or after the session date.
pub fn attendance_allowed(session_date: NaiveDate, now: NaiveDateTime, allow_future: bool) -> Result<(), PolicyError> {
    if session_date > now.date() && !allow_future {
        return Err(PolicyError::FutureAttendance(session_date));
    }
    Ok(())
}

impl Engine {
    /// Record a participant's attendance for a session.
    ///
    /// Holds the booking's ledger lock while writing to the coaching side,
    /// so a concurrent reschedule either sees the mark or completes first.
    pub async fn mark_attendance(&self, session_id: Ulid, participant_id: Ulid, attended: bool) -> Result<(), EngineError> {
        let booking_id = self
            .session_index
            .get(&session_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(Entity::Session, session_id))?;
        let (key, _ledger) = self.lock_booking(booking_id).await?;

        let now = self.clock.now();
        attendance_allowed(key.date, now, self.rules.allow_future_attendance)?;

        self.coaching
            .record_attendance(session_id, participant_id, attended, now)
            .await;
        tracing::debug!("attendance for {participant_id} in session {session_id}: {attended}");
        Ok(())
    }
}
