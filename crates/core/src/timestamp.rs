//! Millisecond timestamps.
//!
//! Tag lifetimes are stored as integer milliseconds since the Unix epoch so
//! the catalog can compare `end + window` arithmetically.

use time::OffsetDateTime;

/// Milliseconds since the Unix epoch.
pub fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert epoch milliseconds back into a UTC timestamp.
///
/// Out-of-range values saturate to the Unix epoch.
pub fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
