//! Configuration management for Turnstile.
//!
//! Settings are layered: built-in defaults, then an optional file (format
//! picked from its extension), then `TURNSTILE__*` environment variables,
//! e.g. `TURNSTILE__REAPER__SWEEP_INTERVAL_SECS=60`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{PolicyOverride, PolicyTable};

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Expired-record sweeping
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policies replacing or extending the built-in table
    #[serde(default)]
    pub policies: Vec<PolicyOverride>,
}

/// Reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether to run the background sweep at all
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ReaperConfig {
    /// Time between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TurnstileConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.reaper.enabled && self.reaper.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "reaper.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        for policy in &self.policies {
            policy.limit()?;
        }
        Ok(())
    }

    /// The built-in policy table with this configuration's overrides applied.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::with_overrides(&self.policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert!(config.reaper.enabled);
        assert_eq!(config.reaper.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.policy_table().unwrap(), PolicyTable::default());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
reaper:
  sweep_interval_secs: 60
logging:
  json: true
policies:
  - name: api.search
    window_ms: 30000
    max: 10
"#;
        let config: TurnstileConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert!(config.reaper.enabled);
        assert_eq!(config.reaper.sweep_interval_secs, 60);
        assert!(config.logging.json);

        let table = config.policy_table().unwrap();
        let search = table.resolve("api.search").unwrap();
        assert_eq!(search.window_ms(), 30_000);
        assert_eq!(search.max(), 10);
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = TurnstileConfig::default();
        config.reaper.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(TurnstileError::Config(_))));

        config.reaper.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let config = TurnstileConfig {
            policies: vec![PolicyOverride {
                name: "auth.login".to_string(),
                window_ms: 60_000,
                max: 0,
            }],
            ..TurnstileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file() {
        let config = TurnstileConfig::load(None).unwrap();
        assert_eq!(config.reaper.sweep_interval_secs, 300);
    }
}
