//! Error types for Turnstile.
//!
//! Denying a request is not an error; these variants only cover
//! misconfiguration and process lifecycle failures.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limit that can never be enforced (zero max, zero or oversized window)
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// A policy name missing from the policy table
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// Layered settings could not be loaded or deserialized
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Background reaper task failed to stop cleanly
    #[error("Reaper error: {0}")]
    Reaper(String),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
