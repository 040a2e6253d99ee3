//! Turnstile - In-process Request Admission Control
//!
//! This crate decides, per caller identifier and operation category, whether
//! a request may proceed based on how many requests that identifier made in
//! the current window. Policies (plain, progressive, per-IP, per-user,
//! combined, burst and load-adaptive) sit on a concurrent counter store that
//! a background reaper keeps bounded.

pub mod config;
pub mod error;
pub mod ratelimit;
