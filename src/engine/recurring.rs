use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability::BOOKINGS_CREATED_TOTAL;
use crate::recurrence::RecurrencePattern;

use super::{Engine, EngineError, ValidationError};

/// Result of one occurrence of a recurring series.
#[derive(Debug)]
pub struct OccurrenceOutcome {
    pub date: NaiveDate,
    pub result: Result<Booking, EngineError>,
}

impl OccurrenceOutcome {
    pub fn is_committed(&self) -> bool {
        self.result.is_ok()
    }
}

impl Engine {
    /// Expand a template into its occurrences and book each one independently.
    ///
    /// Every occurrence goes through the single-booking path, so a conflict
    /// on one date never blocks the others. The returned list is in date
    /// order and has one entry per generated date.
    pub async fn expand_recurring(
        &self,
        template: NewBooking,
        pattern: &RecurrencePattern,
    ) -> Result<Vec<OccurrenceOutcome>, EngineError> {
        if template.session.is_some() {
            return Err(ValidationError::RecurringSession.into());
        }
        pattern
            .validate(template.date)
            .map_err(ValidationError::Recurrence)?;
        // Unknown ground fails the whole request rather than every occurrence.
        self.ground_state(&template.ground_id)?;

        // An explicit deadline keeps its offset from the start on every date.
        let deadline_lead = template
            .booking_deadline
            .map(|d| template.span.start.on(template.date) - d);

        let series_id = Ulid::new();
        let dates = pattern.dates(template.date);
        let mut outcomes = Vec::with_capacity(dates.len());
        for (index, date) in dates.into_iter().enumerate() {
            let mut req = template.clone();
            req.date = date;
            req.booking_deadline = deadline_lead.map(|lead| req.span.start.on(date) - lead);
            let info = RecurrenceInfo {
                series_id,
                index: index as u32,
                frequency: pattern.frequency,
            };
            let result = self.create_booking_with(req, Some(info)).await;
            if result.is_ok() {
                metrics::counter!(BOOKINGS_CREATED_TOTAL, "source" => "recurring").increment(1);
            }
            outcomes.push(OccurrenceOutcome { date, result });
        }

        let committed = outcomes.iter().filter(|o| o.is_committed()).count();
        tracing::info!(
            "series {series_id}: {committed}/{} occurrences booked",
            outcomes.len()
        );
        Ok(outcomes)
    }
}
