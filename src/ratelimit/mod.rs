//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod descriptor;
mod engine;
mod guard;
pub mod headers;
mod reaper;
mod rules;
mod store;

pub use backend::{CheckResult, CounterStore, Quota};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::CounterRecord;
pub use descriptor::{BurstWindow, KeySpace, LimitKey};
pub use engine::{
    is_suspicious_agent, LimitStatus, PolicyEngine, DEFAULT_LOAD_FACTOR,
    DEFAULT_VIOLATION_MULTIPLIER, SUSPICIOUS_AGENT_MULTIPLIER, SUSPICIOUS_AGENT_PATTERNS,
};
pub use guard::{AdmissionGuard, IdentifierStrategy, RequestIdentity};
pub use headers::{Decision, RateLimitHeaders};
pub use reaper::Reaper;
pub use rules::{LimitConfig, PolicyOverride, PolicyTable, MAX_WINDOW_MS, VIOLATION_WINDOW_MS};
pub use store::InMemoryStore;
