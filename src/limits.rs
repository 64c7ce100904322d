//! Hard caps that keep every operation bounded.

pub const MAX_SLOTS_PER_GROUND: u8 = 12;
pub const MAX_GROUNDS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_TAGS: usize = 32;
pub const MAX_PAGE_SIZE: usize = 200;

/// Date-range availability queries span at most this many days.
pub const MAX_AVAILABILITY_DAYS: i64 = 62;
pub const MIN_GRANULARITY_MINUTES: u16 = 15;

pub const MAX_RECURRENCE_OCCURRENCES: usize = 366;
/// Upper bound on how far a recurrence scan walks past its anchor date.
pub const MAX_RECURRENCE_SPAN_DAYS: i64 = 3 * 366;

/// Disjoint intervals in one day at 15-minute resolution.
pub const MAX_BOOKINGS_PER_SLOT_DAY: usize = 96;
