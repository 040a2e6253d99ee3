//! Counter store trait for abstracting over storage backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::counter::CounterRecord;
use super::rules::LimitConfig;

/// Outcome of a single check-and-increment.
///
/// Every field is taken inside the same critical section as the decision,
/// so `remaining` and `reset_at` agree with `allowed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Requests left in the window after this one
    pub remaining: u64,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
    /// The store's notion of "now" at decision time
    pub checked_at: DateTime<Utc>,
}

/// Read-only quota snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests left in the window
    pub remaining: u64,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

/// Trait for counter store implementations.
///
/// The policy engine only talks to storage through this trait, so the
/// in-process [`InMemoryStore`](super::InMemoryStore) can be swapped for a
/// shared backend without touching call sites.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// The store's current time.
    fn now(&self) -> DateTime<Utc>;

    /// Count a request against `key` if its window has room.
    ///
    /// A missing or expired record is replaced by a fresh window holding this
    /// request, which is always admitted. Within a live window the request is
    /// admitted and counted while `count < max`; otherwise it is denied and
    /// the record is left unchanged. Read, compare and increment happen
    /// atomically per key.
    async fn check_and_increment(&self, key: &str, limit: &LimitConfig) -> CheckResult;

    /// What the quota for `key` looks like right now, without counting.
    ///
    /// With no live record this reports what an immediate admit would leave:
    /// `max - 1` remaining and a reset one window from now.
    async fn remaining(&self, key: &str, limit: &LimitConfig) -> Quota;

    /// The live record for `key`, if any.
    async fn peek(&self, key: &str) -> Option<CounterRecord>;

    /// Delete the record for `key` unconditionally.
    async fn clear(&self, key: &str);

    /// Delete every record whose window has closed by `now`.
    ///
    /// Returns the number of records removed.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;
}
