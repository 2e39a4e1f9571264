pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_ATTENDEES: u32 = 10_000;

/// Hard cap on live bookings held by one store.
pub const MAX_BOOKINGS: usize = 1_000_000;

/// Largest single log record accepted on replay (corrupt length guard).
pub const MAX_RECORD_LEN: usize = 64 * 1024;
