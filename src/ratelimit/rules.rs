//! Limit definitions and the named policy table.
//!
//! A [`LimitConfig`] is the `{window_ms, max}` pair every check runs under.
//! Invalid limits are rejected when they are built or deserialized, so an
//! engine never sees a window of zero or a max below one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Longest window a limit may use (one year).
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// How long a denial counts against an identifier's history.
pub const VIOLATION_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// A validated window size and request cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLimit", into = "RawLimit")]
pub struct LimitConfig {
    window_ms: u64,
    max: u64,
}

/// Unvalidated wire form of a [`LimitConfig`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLimit {
    #[serde(alias = "window_ms")]
    window_ms: u64,
    max: u64,
}

impl TryFrom<RawLimit> for LimitConfig {
    type Error = TurnstileError;

    fn try_from(raw: RawLimit) -> Result<Self> {
        LimitConfig::new(raw.window_ms, raw.max)
    }
}

impl From<LimitConfig> for RawLimit {
    fn from(limit: LimitConfig) -> Self {
        RawLimit {
            window_ms: limit.window_ms,
            max: limit.max,
        }
    }
}

impl LimitConfig {
    /// Create a limit of `max` requests per `window_ms` milliseconds.
    pub fn new(window_ms: u64, max: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(TurnstileError::InvalidLimit(
                "window must be longer than 0ms".to_string(),
            ));
        }
        if window_ms > MAX_WINDOW_MS {
            return Err(TurnstileError::InvalidLimit(format!(
                "window of {}ms exceeds the {}ms ceiling",
                window_ms, MAX_WINDOW_MS
            )));
        }
        if max == 0 {
            return Err(TurnstileError::InvalidLimit(
                "max must allow at least one request".to_string(),
            ));
        }
        Ok(Self { window_ms, max })
    }

    /// The limit violation history is recorded under: a 24 hour window that
    /// never denies.
    pub fn violation_history() -> Self {
        Self {
            window_ms: VIOLATION_WINDOW_MS,
            max: u64::MAX,
        }
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Maximum requests admitted per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// The same window with a different cap, clamped to at least one.
    pub fn with_max(&self, max: u64) -> Self {
        Self {
            window_ms: self.window_ms,
            max: max.max(1),
        }
    }

    /// The same window with the cap scaled by `factor`, floored and clamped
    /// to at least one.
    pub fn scaled(&self, factor: f64) -> Self {
        let scaled = (self.max as f64 * factor).floor();
        let max = if scaled.is_finite() && scaled >= 1.0 {
            // Saturating float-to-int cast.
            scaled as u64
        } else {
            1
        };
        self.with_max(max)
    }
}

/// A single policy entry as it appears in a settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    /// Policy name, e.g. `auth.login`
    pub name: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum requests per window
    pub max: u64,
}

impl PolicyOverride {
    /// Validate this entry into a [`LimitConfig`].
    pub fn limit(&self) -> Result<LimitConfig> {
        LimitConfig::new(self.window_ms, self.max).map_err(|e| {
            TurnstileError::Config(format!("policy '{}': {}", self.name, e))
        })
    }
}

/// Named limits keyed by policy name (`auth.login`, `api.search`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    policies: BTreeMap<String, LimitConfig>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        const MINUTE: u64 = 60 * 1000;
        const QUARTER_HOUR: u64 = 15 * MINUTE;
        const HOUR: u64 = 60 * MINUTE;

        let defaults: [(&str, u64, u64); 8] = [
            ("auth.login", QUARTER_HOUR, 5),
            ("auth.register", HOUR, 3),
            ("auth.passwordReset", HOUR, 3),
            ("api.general", QUARTER_HOUR, 100),
            ("api.search", MINUTE, 30),
            ("api.upload", HOUR, 10),
            ("api.payment", HOUR, 20),
            ("admin.general", QUARTER_HOUR, 200),
        ];

        let policies = defaults
            .into_iter()
            .map(|(name, window_ms, max)| (name.to_string(), LimitConfig { window_ms, max }))
            .collect();

        Self { policies }
    }
}

impl PolicyTable {
    /// The default table with `overrides` replacing or adding entries.
    ///
    /// Fails on the first override whose limit is invalid.
    pub fn with_overrides(overrides: &[PolicyOverride]) -> Result<Self> {
        let mut table = Self::default();
        for entry in overrides {
            table.insert(entry.name.clone(), entry.limit()?);
        }
        Ok(table)
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: impl Into<String>, limit: LimitConfig) {
        self.policies.insert(name.into(), limit);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&LimitConfig> {
        self.policies.get(name)
    }

    /// Look up a policy by name, failing loudly when it is missing.
    pub fn resolve(&self, name: &str) -> Result<LimitConfig> {
        self.get(name)
            .copied()
            .ok_or_else(|| TurnstileError::UnknownPolicy(name.to_string()))
    }

    /// Iterate policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LimitConfig)> {
        self.policies.iter().map(|(name, limit)| (name.as_str(), limit))
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
