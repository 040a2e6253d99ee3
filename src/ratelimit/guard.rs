//! Per-route admission guards.
//!
//! A guard fixes the policy type, its limit and how to pick an identifier
//! from a request when it is built, then answers one question per request.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::backend::CounterStore;
use super::engine::{LimitStatus, PolicyEngine};
use super::headers::Decision;
use super::rules::{LimitConfig, PolicyTable};
use super::store::InMemoryStore;
use crate::error::Result;

/// The caller identity a transport layer extracts from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Normalized client IP
    pub ip: String,
    /// Authenticated user id, if any
    pub user_id: Option<String>,
    /// Raw `User-Agent` header, if any
    pub user_agent: Option<String>,
}

impl RequestIdentity {
    /// An anonymous caller.
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    /// Attach an authenticated user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// How a guard turns a request into counter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierStrategy {
    /// Per-IP, with the automated user-agent reduction
    #[default]
    Ip,
    /// Per-user; anonymous callers fall back to per-IP
    User,
    /// Per-IP and, when authenticated, per-user at twice the cap
    Combined,
    /// Per-IP with a cap that shrinks after violations
    Progressive,
}

/// Admission check bound to one policy.
pub struct AdmissionGuard<S: CounterStore + ?Sized = InMemoryStore> {
    engine: PolicyEngine<S>,
    policy_type: String,
    limit: LimitConfig,
    strategy: IdentifierStrategy,
}

impl<S: CounterStore + ?Sized> AdmissionGuard<S> {
    /// Create a guard for `policy_type` with an explicit limit.
    pub fn new(
        engine: PolicyEngine<S>,
        policy_type: impl Into<String>,
        limit: LimitConfig,
        strategy: IdentifierStrategy,
    ) -> Self {
        Self {
            engine,
            policy_type: policy_type.into(),
            limit,
            strategy,
        }
    }

    /// Create a guard for a named policy from `table`.
    ///
    /// The policy name doubles as the policy type of the counter keys.
    pub fn from_table(
        engine: PolicyEngine<S>,
        table: &PolicyTable,
        policy: &str,
        strategy: IdentifierStrategy,
    ) -> Result<Self> {
        let limit = table.resolve(policy)?;
        Ok(Self::new(engine, policy, limit, strategy))
    }

    /// Create a guard over `store` for a named policy from `table`.
    pub fn for_store(
        store: Arc<S>,
        table: &PolicyTable,
        policy: &str,
        strategy: IdentifierStrategy,
    ) -> Result<Self> {
        Self::from_table(PolicyEngine::new(store), table, policy, strategy)
    }

    /// The policy type this guard counts under.
    pub fn policy_type(&self) -> &str {
        &self.policy_type
    }

    /// The limit this guard enforces.
    pub fn limit(&self) -> &LimitConfig {
        &self.limit
    }

    /// Count the request and decide whether it may proceed.
    pub async fn decide(&self, request: &RequestIdentity) -> Decision {
        let status = self.status(request).await;

        if !status.allowed {
            debug!(
                policy = %self.policy_type,
                ip = %request.ip,
                user_id = ?request.user_id,
                strategy = ?self.strategy,
                "Request denied"
            );
        }

        Decision::from_status(&status)
    }

    async fn status(&self, request: &RequestIdentity) -> LimitStatus {
        let policy_type = self.policy_type.as_str();
        let user_agent = request.user_agent.as_deref();

        match (self.strategy, request.user_id.as_deref()) {
            (IdentifierStrategy::Ip, _) | (IdentifierStrategy::User, None) => {
                self.engine
                    .ip_status(&request.ip, policy_type, &self.limit, user_agent)
                    .await
            }
            (IdentifierStrategy::User, Some(user_id)) => {
                self.engine
                    .user_status(user_id, policy_type, &self.limit)
                    .await
            }
            (IdentifierStrategy::Combined, user_id) => {
                self.engine
                    .combined_status(&request.ip, user_id, policy_type, &self.limit)
                    .await
            }
            (IdentifierStrategy::Progressive, _) => {
                self.engine
                    .progressive_status(&request.ip, policy_type, &self.limit, None)
                    .await
            }
        }
    }
}
