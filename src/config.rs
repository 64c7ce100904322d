use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MIN_GRANULARITY_MINUTES;
use crate::time::TimeOfDay;

/// Business-rule timings shared by every write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingRules {
    /// Cancellation closes this long before the start.
    pub cancellation_lead: chrono::Duration,
    /// A reschedule target must start more than this far in the future.
    pub reschedule_notice: chrono::Duration,
    /// Staging override: allow attendance for sessions that have not happened.
    pub allow_future_attendance: bool,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            cancellation_lead: chrono::Duration::hours(2),
            reschedule_notice: chrono::Duration::hours(24),
            allow_future_attendance: false,
        }
    }
}

/// Operating hours and bucket width of an availability grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityPolicy {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
    pub granularity_minutes: u16,
}

impl AvailabilityPolicy {
    /// Ground-only pickers: 06:00–22:00 in 2-hour buckets.
    pub fn ground_only() -> Self {
        Self {
            open: TimeOfDay::from_minutes(6 * 60).unwrap_or(TimeOfDay::MIDNIGHT),
            close: TimeOfDay::from_minutes(22 * 60).unwrap_or(TimeOfDay::END_OF_DAY),
            granularity_minutes: 120,
        }
    }

    /// Combined session + ground pickers: 08:00–20:00 in 1-hour buckets.
    pub fn combined() -> Self {
        Self {
            open: TimeOfDay::from_minutes(8 * 60).unwrap_or(TimeOfDay::MIDNIGHT),
            close: TimeOfDay::from_minutes(20 * 60).unwrap_or(TimeOfDay::END_OF_DAY),
            granularity_minutes: 60,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.open >= self.close {
            return Err("opening time must be before closing time");
        }
        if self.granularity_minutes < MIN_GRANULARITY_MINUTES {
            return Err("granularity too fine");
        }
        if u32::from(self.granularity_minutes) > u32::from(self.close.minutes() - self.open.minutes()) {
            return Err("granularity wider than operating hours");
        }
        Ok(())
    }
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self::ground_only()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub rules: SchedulingRules,
    pub availability: AvailabilityPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = AvailabilityPolicy::default();
        let availability = AvailabilityPolicy {
            open: parsed(&lookup, "WICKET_OPEN").unwrap_or(defaults.open),
            close: parsed(&lookup, "WICKET_CLOSE").unwrap_or(defaults.close),
            granularity_minutes: parsed(&lookup, "WICKET_GRANULARITY_MINUTES")
                .unwrap_or(defaults.granularity_minutes),
        };
        let availability = match availability.validate() {
            Ok(()) => availability,
            Err(reason) => {
                tracing::warn!("ignoring availability settings: {reason}");
                defaults
            }
        };

        let rule_defaults = SchedulingRules::default();
        let rules = SchedulingRules {
            cancellation_lead: parsed::<i64>(&lookup, "WICKET_CANCEL_LEAD_MINUTES")
                .map(chrono::Duration::minutes)
                .unwrap_or(rule_defaults.cancellation_lead),
            reschedule_notice: parsed::<i64>(&lookup, "WICKET_RESCHEDULE_NOTICE_HOURS")
                .map(chrono::Duration::hours)
                .unwrap_or(rule_defaults.reschedule_notice),
            allow_future_attendance: parsed(&lookup, "WICKET_ALLOW_FUTURE_ATTENDANCE")
                .unwrap_or(rule_defaults.allow_future_attendance),
        };

        Self {
            data_dir: lookup("WICKET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: parsed(&lookup, "WICKET_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "WICKET_COMPACT_THRESHOLD").unwrap_or(1000),
            rules,
            availability,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
