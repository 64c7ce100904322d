use chrono::{Datelike, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_RECURRENCE_OCCURRENCES, MAX_RECURRENCE_SPAN_DAYS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly,
    BiWeekly,
    Monthly,
}

impl Frequency {
    /// Fixed step in days; `None` for calendar-month steps.
    fn step_days(self) -> Option<i64> {
        match self {
            Frequency::Daily => Some(1),
            Frequency::Weekly => Some(7),
            Frequency::BiWeekly => Some(14),
            Frequency::Monthly => None,
        }
    }

    fn period_weeks(self) -> i64 {
        match self {
            Frequency::BiWeekly => 2,
            _ => 1,
        }
    }
}

/// How a template booking repeats. At least one of `until` / `count` bounds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    /// Restricts occurrences to these weekdays. Ignored for monthly patterns.
    pub days: Vec<Weekday>,
    /// Inclusive last date.
    pub until: Option<NaiveDate>,
    pub count: Option<u32>,
}

impl RecurrencePattern {
    pub fn weekly(count: u32) -> Self {
        Self {
            frequency: Frequency::Weekly,
            days: Vec::new(),
            until: None,
            count: Some(count),
        }
    }

    pub fn until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days = days.into_iter().collect();
        self
    }

    pub fn validate(&self, anchor: NaiveDate) -> Result<(), &'static str> {
        if self.until.is_none() && self.count.is_none() {
            return Err("recurrence needs an end date or an occurrence count");
        }
        if self.count == Some(0) {
            return Err("occurrence count must be positive");
        }
        if self.count.is_some_and(|c| c as usize > MAX_RECURRENCE_OCCURRENCES) {
            return Err("too many occurrences");
        }
        if self.until.is_some_and(|u| u < anchor) {
            return Err("end date precedes the first occurrence");
        }
        Ok(())
    }

    /// Dates of every occurrence, starting at `anchor`, in order.
    ///
    /// Monthly steps are taken from the anchor (Jan 31 → Feb 29 → Mar 31),
    /// so short months never shift later occurrences.
    pub fn dates(&self, anchor: NaiveDate) -> Vec<NaiveDate> {
        let limit = self
            .count
            .map_or(MAX_RECURRENCE_OCCURRENCES, |c| (c as usize).min(MAX_RECURRENCE_OCCURRENCES));
        let horizon = anchor + chrono::Duration::days(MAX_RECURRENCE_SPAN_DAYS);
        let last = self.until.map_or(horizon, |u| u.min(horizon));

        if !self.days.is_empty() && self.frequency != Frequency::Monthly {
            return self.dates_on_days(anchor, last, limit);
        }

        let mut dates = Vec::new();
        let mut i: u32 = 0;
        while dates.len() < limit {
            let date = match self.frequency.step_days() {
                Some(step) => anchor.checked_add_signed(chrono::Duration::days(step * i64::from(i))),
                None => anchor.checked_add_months(Months::new(i)),
            };
            match date {
                Some(d) if d <= last => dates.push(d),
                _ => break,
            }
            i += 1;
        }
        dates
    }

    fn dates_on_days(&self, anchor: NaiveDate, last: NaiveDate, limit: usize) -> Vec<NaiveDate> {
        let period = self.frequency.period_weeks();
        let mut dates = Vec::new();
        let mut day = anchor;
        while day <= last && dates.len() < limit {
            let week = (day - anchor).num_days() / 7;
            let in_period = self.frequency == Frequency::Daily || week % period == 0;
            if in_period && self.days.contains(&day.weekday()) {
                dates.push(day);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        dates
    }
}
