//! In-process counter store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{CheckResult, CounterStore, Quota};
use super::clock::{Clock, SystemClock};
use super::counter::{window_delta, CounterRecord};
use super::rules::LimitConfig;

/// Window counters held in a sharded concurrent map.
///
/// This struct is thread-safe and meant to be shared behind an `Arc` by the
/// policy engine, the request handlers and the [`Reaper`](super::Reaper).
/// Counts are local to this process.
pub struct InMemoryStore {
    /// Counter records indexed by composite key
    records: DashMap<String, CounterRecord>,
    /// Time source for window accounting
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store on wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of records currently held, live or not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The live record for `key`, dropping it if its window has closed.
    fn live_record(&self, key: &str, now: DateTime<Utc>) -> Option<CounterRecord> {
        let record = *self.records.get(key)?;
        if record.is_expired(now) {
            // Only remove if nobody reopened the window in between.
            self.records.remove_if(key, |_, r| r.is_expired(now));
            return None;
        }
        Some(record)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("records", &self.records.len())
            .field("clock", &self.clock)
            .finish()
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn check_and_increment(&self, key: &str, limit: &LimitConfig) -> CheckResult {
        let now = self.clock.now();

        // The entry guard holds the shard lock for the whole read-compare-write.
        let (allowed, record) = match self.records.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = CounterRecord::open(now, limit);
                    (true, *record)
                } else {
                    let allowed = record.try_increment(limit.max());
                    (allowed, *record)
                }
            }
            Entry::Vacant(vacant) => {
                let record = CounterRecord::open(now, limit);
                debug!(key = %key, window_ms = limit.window_ms(), max = limit.max(), "Opening counter window");
                vacant.insert(record);
                (true, record)
            }
        };

        trace!(
            key = %key,
            count = record.count,
            max = limit.max(),
            allowed = allowed,
            "Checked counter"
        );

        CheckResult {
            allowed,
            remaining: record.remaining(limit.max()),
            reset_at: record.window_end,
            checked_at: now,
        }
    }

    async fn remaining(&self, key: &str, limit: &LimitConfig) -> Quota {
        let now = self.clock.now();
        match self.live_record(key, now) {
            Some(record) => Quota {
                remaining: record.remaining(limit.max()),
                reset_at: record.window_end,
            },
            None => Quota {
                remaining: limit.max() - 1,
                reset_at: now + window_delta(limit),
            },
        }
    }

    async fn peek(&self, key: &str) -> Option<CounterRecord> {
        self.live_record(key, self.clock.now())
    }

    async fn clear(&self, key: &str) {
        if self.records.remove(key).is_some() {
            debug!(key = %key, "Cleared counter");
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use chrono::TimeZone;

    fn test_store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        ));
        let store = InMemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    fn limit(window_ms: u64, max: u64) -> LimitConfig {
        LimitConfig::new(window_ms, max).unwrap()
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_first_check_creates_record() {
        let (clock, store) = test_store();
        let limit = limit(60_000, 5);

        let result = store.check_and_increment("login:1.2.3.4", &limit).await;

        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
        assert_eq!(result.checked_at, clock.now());
        assert_eq!(result.reset_at, clock.now() + chrono::Duration::milliseconds(60_000));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_denied_check_does_not_count() {
        let (_clock, store) = test_store();
        let limit = limit(60_000, 2);

        assert!(store.check_and_increment("k", &limit).await.allowed);
        assert!(store.check_and_increment("k", &limit).await.allowed);
        for _ in 0..3 {
            let result = store.check_and_increment("k", &limit).await;
            assert!(!result.allowed);
            assert_eq!(result.remaining, 0);
        }

        assert_eq!(store.peek("k").await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_expired_window_is_replaced() {
        let (clock, store) = test_store();
        let limit = limit(1_000, 3);

        for _ in 0..3 {
            store.check_and_increment("k", &limit).await;
        }
        assert!(!store.check_and_increment("k", &limit).await.allowed);

        clock.advance_ms(1_000);

        let result = store.check_and_increment("k", &limit).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
        assert_eq!(store.peek("k").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_remaining_without_record() {
        let (clock, store) = test_store();
        let limit = limit(60_000, 5);

        let quota = store.remaining("missing", &limit).await;

        assert_eq!(quota.remaining, 4);
        assert_eq!(quota.reset_at, clock.now() + chrono::Duration::milliseconds(60_000));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remaining_is_idempotent() {
        let (_clock, store) = test_store();
        let limit = limit(60_000, 5);

        store.check_and_increment("k", &limit).await;
        store.check_and_increment("k", &limit).await;

        let first = store.remaining("k", &limit).await;
        for _ in 0..10 {
            assert_eq!(store.remaining("k", &limit).await, first);
        }
        assert_eq!(first.remaining, 3);
    }

    #[tokio::test]
    async fn test_lookup_drops_expired_record() {
        let (clock, store) = test_store();
        let limit = limit(1_000, 5);

        store.check_and_increment("k", &limit).await;
        clock.advance_ms(5_000);

        assert!(store.peek("k").await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let (_clock, store) = test_store();
        let limit = limit(60_000, 1);

        store.check_and_increment("k", &limit).await;
        assert!(!store.check_and_increment("k", &limit).await.allowed);

        store.clear("k").await;
        assert!(store.check_and_increment("k", &limit).await.allowed);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (clock, store) = test_store();

        store.check_and_increment("short", &limit(1_000, 5)).await;
        store.check_and_increment("long", &limit(60_000, 5)).await;
        clock.advance_ms(1_000);

        let removed = store.sweep(clock.now()).await;

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.peek("long").await.is_some());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (_clock, store) = test_store();
        let limit = limit(60_000, 1);

        assert!(store.check_and_increment("login:a", &limit).await.allowed);
        assert!(store.check_and_increment("login:b", &limit).await.allowed);
        assert!(store.check_and_increment("search:a", &limit).await.allowed);
        assert!(!store.check_and_increment("login:a", &limit).await.allowed);
    }
}
