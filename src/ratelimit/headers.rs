//! Rendering admission decisions into response metadata.

use serde::Serialize;

use super::engine::LimitStatus;

/// Header carrying the cap in force.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Header carrying the requests left in the window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Header carrying the reset instant in epoch seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Header carrying seconds to wait, only sent on denial.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Status code conventionally used for a denied request.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Rate limit headers for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    /// Maximum requests allowed in the window.
    pub limit: u64,

    /// Remaining requests in the current window.
    pub remaining: u64,

    /// Unix timestamp (seconds, rounded up) of reset.
    pub reset: i64,

    /// Seconds to wait before retrying; only set when denied.
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Build headers from a decision.
    pub fn from_status(status: &LimitStatus) -> Self {
        let reset_ms = status.reset_time.timestamp_millis();
        let reset = reset_ms.div_euclid(1000) + i64::from(reset_ms.rem_euclid(1000) > 0);

        let retry_after = if status.allowed {
            None
        } else {
            let wait_ms = (status.reset_time - status.checked_at)
                .num_milliseconds()
                .max(0) as u64;
            Some(wait_ms.div_ceil(1000).max(1))
        };

        Self {
            limit: status.total,
            remaining: status.remaining,
            reset,
            retry_after,
        }
    }

    /// Header name/value pairs in emission order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}

/// What the request-handling layer needs to act on a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Metadata to attach to the response either way
    pub headers: RateLimitHeaders,
}

impl Decision {
    /// Build a decision from an engine status.
    pub fn from_status(status: &LimitStatus) -> Self {
        Self {
            allowed: status.allowed,
            headers: RateLimitHeaders::from_status(status),
        }
    }

    /// The status code to reject with, if the request was denied.
    pub fn rejection_status(&self) -> Option<u16> {
        (!self.allowed).then_some(TOO_MANY_REQUESTS)
    }
}

impl From<LimitStatus> for Decision {
    fn from(status: LimitStatus) -> Self {
        Self::from_status(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn status(allowed: bool, remaining: u64, checked_ms: i64, reset_ms: i64) -> LimitStatus {
        LimitStatus {
            allowed,
            remaining,
            reset_time: Utc.timestamp_millis_opt(reset_ms).unwrap(),
            total: 5,
            checked_at: Utc.timestamp_millis_opt(checked_ms).unwrap(),
        }
    }

    #[test]
    fn test_allowed_headers_have_no_retry_after() {
        let headers = RateLimitHeaders::from_status(&status(true, 3, 0, 60_000));

        assert_eq!(headers.limit, 5);
        assert_eq!(headers.remaining, 3);
        assert_eq!(headers.reset, 60);
        assert_eq!(headers.retry_after, None);
        assert_eq!(headers.to_pairs().len(), 3);
    }

    #[test]
    fn test_denied_headers_include_retry_after() {
        let headers = RateLimitHeaders::from_status(&status(false, 0, 10_000, 60_000));

        assert_eq!(headers.retry_after, Some(50));
        let pairs = headers.to_pairs();
        assert_eq!(pairs.last().unwrap(), &(HEADER_RETRY_AFTER, "50".to_string()));
        assert!(pairs.contains(&(HEADER_REMAINING, "0".to_string())));
    }

    #[test]
    fn test_reset_and_retry_round_up() {
        let headers = RateLimitHeaders::from_status(&status(false, 0, 59_999, 60_001));

        assert_eq!(headers.reset, 61);
        assert_eq!(headers.retry_after, Some(1));
    }

    #[test]
    fn test_decision_rejection_status() {
        assert_eq!(Decision::from(status(false, 0, 0, 1_000)).rejection_status(), Some(429));
        assert_eq!(Decision::from(status(true, 1, 0, 1_000)).rejection_status(), None);
    }
}
