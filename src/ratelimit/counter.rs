//! Per-key window counter records.

use chrono::{DateTime, Duration, Utc};

use super::rules::LimitConfig;

/// One identifier's activity within one window.
///
/// While `now < window_end` the count only grows. Once the window has closed
/// the record is stale and must be replaced, never incremented, so that no
/// history leaks into the next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests counted so far in this window
    pub count: u64,
    /// When this window closes
    pub window_end: DateTime<Utc>,
}

impl CounterRecord {
    /// Open a new window at `now` holding its first request.
    pub fn open(now: DateTime<Utc>, limit: &LimitConfig) -> Self {
        Self {
            count: 1,
            window_end: now + window_delta(limit),
        }
    }

    /// Whether the window has closed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_end <= now
    }

    /// Requests still available under `max`.
    pub fn remaining(&self, max: u64) -> u64 {
        max.saturating_sub(self.count)
    }

    /// Count one more request if the window still has room.
    ///
    /// Returns `false`, leaving the count untouched, when `max` is reached.
    pub fn try_increment(&mut self, max: u64) -> bool {
        if self.count >= max {
            return false;
        }
        self.count += 1;
        true
    }
}

/// Window length of `limit` as a chrono delta.
pub(crate) fn window_delta(limit: &LimitConfig) -> Duration {
    // Bounded by MAX_WINDOW_MS, so this fits in an i64.
    Duration::milliseconds(limit.window_ms() as i64)
}
