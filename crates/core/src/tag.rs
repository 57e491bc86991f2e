//! Tag lifecycle.
//!
//! A tag row is never mutated back to life: re-pointing a tag name ends the
//! previous row and inserts a new one. Whether an ended row still protects
//! its target depends only on `(now, end, window)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::Duration;

/// Per-namespace retention window ("time machine") for ended tags.
///
/// A window of zero makes an ended tag collectible immediately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionWindow(u64);

impl RetentionWindow {
    /// No retention: ended tags expire the moment they end.
    pub const ZERO: Self = Self(0);

    /// Create a window of the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Window length in seconds.
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Window length in milliseconds, saturating.
    pub fn as_millis(&self) -> i64 {
        i64::try_from(self.0)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }

    /// Window as a `time::Duration`.
    pub fn duration(&self) -> Duration {
        Duration::seconds(i64::try_from(self.0).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Lifecycle state of a single tag row at a reference instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagStatus {
    /// The row is the current pointer, or its end lies in the future.
    Active,
    /// The row has ended but is still inside the retention window.
    Ended,
    /// The row ended at least one retention window ago.
    Expired,
}

impl TagStatus {
    /// Classify a tag row.
    ///
    /// `lifetime_end_ms` is `None` for an open-ended row. A row whose end lies
    /// in the future (a scheduled expiration) is still active.
    pub fn evaluate(now_ms: i64, lifetime_end_ms: Option<i64>, window: RetentionWindow) -> Self {
        match lifetime_end_ms {
            None => Self::Active,
            Some(end) if end > now_ms => Self::Active,
            Some(end) if end.saturating_add(window.as_millis()) > now_ms => Self::Ended,
            Some(_) => Self::Expired,
        }
    }

    /// Whether the row still keeps its target reachable.
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Expired => "expired",
        }
    }
}
