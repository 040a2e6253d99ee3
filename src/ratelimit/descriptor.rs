//! Counter key construction.
//!
//! Every key has the shape `<policy-type>:<identifier>`. Composite checks
//! prefix the policy type (`ip:`, `user:`, `violations:`) or suffix the
//! identifier (`:short`, `:long`) so that their quotas live in disjoint
//! key spaces.

use std::fmt;

/// Which counter family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    /// Plain `<type>:<identifier>`
    Plain,
    /// Per-IP quota, `ip:<type>:<ip>`
    Ip,
    /// Per-user quota, `user:<type>:<user>`
    User,
    /// Denial history, `violations:<type>:<identifier>`
    Violations,
}

impl KeySpace {
    fn prefix(&self) -> Option<&'static str> {
        match self {
            KeySpace::Plain => None,
            KeySpace::Ip => Some("ip"),
            KeySpace::User => Some("user"),
            KeySpace::Violations => Some("violations"),
        }
    }
}

/// Which half of a burst check a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BurstWindow {
    /// The short, spike-bounding window
    Short,
    /// The long, sustained-volume window
    Long,
}

impl BurstWindow {
    fn suffix(&self) -> &'static str {
        match self {
            BurstWindow::Short => "short",
            BurstWindow::Long => "long",
        }
    }
}

/// A key that uniquely identifies one counter in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    /// Counter family
    pub space: KeySpace,
    /// Policy type the quota applies to
    pub policy_type: String,
    /// Identifier being bounded
    pub identifier: String,
}

impl LimitKey {
    /// Create a key in `space` for `identifier` under `policy_type`.
    pub fn new(space: KeySpace, policy_type: &str, identifier: &str) -> Self {
        Self {
            space,
            policy_type: policy_type.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// `<type>:<identifier>`
    pub fn plain(policy_type: &str, identifier: &str) -> Self {
        Self::new(KeySpace::Plain, policy_type, identifier)
    }

    /// The violation-history key tracking denials of this key's identifier.
    pub fn violations(&self) -> Self {
        Self::new(KeySpace::Violations, &self.policy_type, &self.identifier)
    }

    /// The burst half of this key.
    pub fn burst(&self, window: BurstWindow) -> Self {
        Self {
            space: self.space,
            policy_type: self.policy_type.clone(),
            identifier: format!("{}:{}", self.identifier, window.suffix()),
        }
    }

    /// The policy type including any key-space prefix, e.g. `ip:login`.
    pub fn scoped_type(&self) -> String {
        match self.space.prefix() {
            Some(prefix) => format!("{}:{}", prefix, self.policy_type),
            None => self.policy_type.clone(),
        }
    }

    /// Convert the key to the string stored in the counter map.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.scoped_type(), self.identifier)
    }
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        let key = LimitKey::plain("login", "1.2.3.4");
        assert_eq!(key.to_string_key(), "login:1.2.3.4");
        assert_eq!(key.scoped_type(), "login");
    }

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(
            LimitKey::new(KeySpace::Ip, "login", "1.2.3.4").to_string_key(),
            "ip:login:1.2.3.4"
        );
        assert_eq!(
            LimitKey::new(KeySpace::User, "login", "u-42").to_string_key(),
            "user:login:u-42"
        );
    }

    #[test]
    fn test_violations_key() {
        let key = LimitKey::plain("search", "1.2.3.4").violations();
        assert_eq!(key.to_string(), "violations:search:1.2.3.4");
    }

    #[test]
    fn test_burst_keys_are_distinct() {
        let key = LimitKey::plain("api", "client");
        let short = key.burst(BurstWindow::Short);
        let long = key.burst(BurstWindow::Long);

        assert_eq!(short.to_string_key(), "api:client:short");
        assert_eq!(long.to_string_key(), "api:client:long");
        assert_ne!(short, long);
        assert_ne!(short, key);
    }

    #[test]
    fn test_ip_and_user_spaces_do_not_collide() {
        let ip = LimitKey::new(KeySpace::Ip, "login", "same");
        let user = LimitKey::new(KeySpace::User, "login", "same");
        assert_ne!(ip.to_string_key(), user.to_string_key());
    }
}
