//! Admission policies built on top of a [`CounterStore`].
//!
//! The engine holds no state of its own: every policy resolves an effective
//! [`LimitConfig`] for the call, derives a key and hands both to the store.
//! It can be rebuilt around the same store at any time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::backend::{CheckResult, CounterStore};
use super::descriptor::{BurstWindow, KeySpace, LimitKey};
use super::rules::LimitConfig;
use super::store::InMemoryStore;

/// Multiplier applied to the base cap once an identifier has a violation.
pub const DEFAULT_VIOLATION_MULTIPLIER: f64 = 0.5;

/// Load factor meaning "system healthy, no adjustment".
pub const DEFAULT_LOAD_FACTOR: f64 = 1.0;

/// Multiplier applied to the cap for callers that look automated.
pub const SUSPICIOUS_AGENT_MULTIPLIER: f64 = 0.1;

/// User-agent substrings (matched case-insensitively) that mark automation.
pub const SUSPICIOUS_AGENT_PATTERNS: [&str; 6] =
    ["bot", "crawler", "spider", "scraper", "curl", "wget"];

/// Decision plus the quota metadata callers render into headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitStatus {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Requests left in the window
    pub remaining: u64,
    /// When the window resets
    pub reset_time: DateTime<Utc>,
    /// The cap in force for this decision
    pub total: u64,
    /// When the decision was made
    pub checked_at: DateTime<Utc>,
}

impl LimitStatus {
    fn from_check(result: CheckResult, limit: &LimitConfig) -> Self {
        Self {
            allowed: result.allowed,
            remaining: result.remaining,
            reset_time: result.reset_at,
            total: limit.max(),
            checked_at: result.checked_at,
        }
    }

    /// Pick the status that binds tighter: a denial wins, otherwise the one
    /// with less quota left.
    pub fn most_restrictive(self, other: LimitStatus) -> LimitStatus {
        match (self.allowed, other.allowed) {
            (false, _) => self,
            (true, false) => other,
            (true, true) if other.remaining < self.remaining => other,
            (true, true) => self,
        }
    }
}

/// Whether a user agent matches any automation signature.
pub fn is_suspicious_agent(user_agent: &str) -> bool {
    let agent = user_agent.to_ascii_lowercase();
    SUSPICIOUS_AGENT_PATTERNS
        .iter()
        .any(|pattern| agent.contains(pattern))
}

/// Admission policies over a shared counter store.
pub struct PolicyEngine<S: CounterStore + ?Sized = InMemoryStore> {
    store: Arc<S>,
}

impl<S: CounterStore + ?Sized> Clone for PolicyEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CounterStore + ?Sized> PolicyEngine<S> {
    /// Create an engine over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Plain fixed-window check for `identifier` under `policy_type`.
    pub async fn check_limit(&self, identifier: &str, policy_type: &str, limit: &LimitConfig) -> bool {
        self.key_status(&LimitKey::plain(policy_type, identifier), limit)
            .await
            .allowed
    }

    /// Fixed-window check whose cap shrinks once the identifier has been
    /// denied within the last 24 hours.
    ///
    /// `violation_multiplier` defaults to [`DEFAULT_VIOLATION_MULTIPLIER`]. It
    /// is applied once, however many violations are on record.
    pub async fn check_progressive_limit(
        &self,
        identifier: &str,
        policy_type: &str,
        base: &LimitConfig,
        violation_multiplier: Option<f64>,
    ) -> bool {
        self.progressive_status(identifier, policy_type, base, violation_multiplier)
            .await
            .allowed
    }

    /// Per-IP check; automated-looking user agents get a tenth of the cap.
    pub async fn check_ip_limit(
        &self,
        ip: &str,
        policy_type: &str,
        limit: &LimitConfig,
        user_agent: Option<&str>,
    ) -> bool {
        self.ip_status(ip, policy_type, limit, user_agent)
            .await
            .allowed
    }

    /// Per-user check.
    pub async fn check_user_limit(&self, user_id: &str, policy_type: &str, limit: &LimitConfig) -> bool {
        self.user_status(user_id, policy_type, limit).await.allowed
    }

    /// Per-IP check, plus a per-user check at twice the cap when the caller
    /// is authenticated. Both must pass.
    pub async fn check_combined_limit(
        &self,
        ip: &str,
        user_id: Option<&str>,
        policy_type: &str,
        limit: &LimitConfig,
    ) -> bool {
        self.combined_status(ip, user_id, policy_type, limit)
            .await
            .allowed
    }

    /// Independent short and long window checks. Both must pass.
    pub async fn check_burst_limit(
        &self,
        identifier: &str,
        policy_type: &str,
        short: &LimitConfig,
        long: &LimitConfig,
    ) -> bool {
        self.burst_status(identifier, policy_type, short, long)
            .await
            .allowed
    }

    /// Fixed-window check with the cap scaled by the current load factor.
    ///
    /// `system_load_factor` defaults to [`DEFAULT_LOAD_FACTOR`]; values below
    /// one tighten the cap.
    pub async fn check_adaptive_limit(
        &self,
        identifier: &str,
        policy_type: &str,
        base: &LimitConfig,
        system_load_factor: Option<f64>,
    ) -> bool {
        self.adaptive_status(identifier, policy_type, base, system_load_factor)
            .await
            .allowed
    }

    /// Count the request and report the decision with its quota metadata.
    pub async fn get_limit_status(
        &self,
        identifier: &str,
        policy_type: &str,
        limit: &LimitConfig,
    ) -> LimitStatus {
        self.key_status(&LimitKey::plain(policy_type, identifier), limit)
            .await
    }

    /// Administrative reset of `identifier`'s counter under `policy_type`.
    pub async fn clear_limit(&self, identifier: &str, policy_type: &str) {
        let key = LimitKey::plain(policy_type, identifier);
        self.store.clear(&key.to_string_key()).await;
    }

    /// [`check_progressive_limit`](Self::check_progressive_limit) with its quota metadata.
    pub async fn progressive_status(
        &self,
        identifier: &str,
        policy_type: &str,
        base: &LimitConfig,
        violation_multiplier: Option<f64>,
    ) -> LimitStatus {
        let key = LimitKey::plain(policy_type, identifier);
        let violations_key = key.violations().to_string_key();

        let violations = self
            .store
            .peek(&violations_key)
            .await
            .map(|record| record.count)
            .unwrap_or(0);

        let effective = if violations > 0 {
            base.scaled(violation_multiplier.unwrap_or(DEFAULT_VIOLATION_MULTIPLIER))
        } else {
            *base
        };

        let status = self.key_status(&key, &effective).await;

        if !status.allowed {
            self.store
                .check_and_increment(&violations_key, &LimitConfig::violation_history())
                .await;
            debug!(
                key = %key,
                prior_violations = violations,
                effective_max = effective.max(),
                "Recorded rate limit violation"
            );
        }

        status
    }

    /// [`check_ip_limit`](Self::check_ip_limit) with its quota metadata.
    pub async fn ip_status(
        &self,
        ip: &str,
        policy_type: &str,
        limit: &LimitConfig,
        user_agent: Option<&str>,
    ) -> LimitStatus {
        let effective = match user_agent {
            Some(agent) if is_suspicious_agent(agent) => {
                let reduced = limit.scaled(SUSPICIOUS_AGENT_MULTIPLIER);
                debug!(
                    ip = %ip,
                    user_agent = %agent,
                    max = reduced.max(),
                    "Reducing limit for automated user agent"
                );
                reduced
            }
            _ => *limit,
        };

        self.key_status(&LimitKey::new(KeySpace::Ip, policy_type, ip), &effective)
            .await
    }

    /// [`check_user_limit`](Self::check_user_limit) with its quota metadata.
    pub async fn user_status(&self, user_id: &str, policy_type: &str, limit: &LimitConfig) -> LimitStatus {
        self.key_status(&LimitKey::new(KeySpace::User, policy_type, user_id), limit)
            .await
    }

    /// [`check_combined_limit`](Self::check_combined_limit) with the metadata
    /// of whichever component binds tighter.
    pub async fn combined_status(
        &self,
        ip: &str,
        user_id: Option<&str>,
        policy_type: &str,
        limit: &LimitConfig,
    ) -> LimitStatus {
        let ip_status = self.ip_status(ip, policy_type, limit, None).await;
        if !ip_status.allowed {
            return ip_status;
        }

        match user_id {
            Some(user_id) => {
                let doubled = limit.with_max(limit.max().saturating_mul(2));
                let user_status = self.user_status(user_id, policy_type, &doubled).await;
                ip_status.most_restrictive(user_status)
            }
            None => ip_status,
        }
    }

    /// [`check_burst_limit`](Self::check_burst_limit) with the metadata of
    /// whichever window binds tighter. Both windows are always counted.
    pub async fn burst_status(
        &self,
        identifier: &str,
        policy_type: &str,
        short: &LimitConfig,
        long: &LimitConfig,
    ) -> LimitStatus {
        let key = LimitKey::plain(policy_type, identifier);
        let short_status = self.key_status(&key.burst(BurstWindow::Short), short).await;
        let long_status = self.key_status(&key.burst(BurstWindow::Long), long).await;
        short_status.most_restrictive(long_status)
    }

    /// [`check_adaptive_limit`](Self::check_adaptive_limit) with its quota metadata.
    pub async fn adaptive_status(
        &self,
        identifier: &str,
        policy_type: &str,
        base: &LimitConfig,
        system_load_factor: Option<f64>,
    ) -> LimitStatus {
        let factor = match system_load_factor {
            Some(factor) if factor.is_finite() && factor > 0.0 => factor,
            Some(factor) => {
                warn!(factor = factor, "Ignoring invalid system load factor");
                DEFAULT_LOAD_FACTOR
            }
            None => DEFAULT_LOAD_FACTOR,
        };

        let effective = base.scaled(factor);
        self.key_status(&LimitKey::plain(policy_type, identifier), &effective)
            .await
    }

    async fn key_status(&self, key: &LimitKey, limit: &LimitConfig) -> LimitStatus {
        let string_key = key.to_string_key();
        trace!(key = %string_key, max = limit.max(), "Checking rate limit");

        let result = self.store.check_and_increment(&string_key, limit).await;
        if !result.allowed {
            debug!(key = %string_key, max = limit.max(), "Rate limit exceeded");
        }

        LimitStatus::from_check(result, limit)
    }
}
