//! Reconnect backoff.
//!
//! - Delay: floor, then `min(delay * growth_factor, cap)`, never decreasing
//! - Reset to the floor on every successful open
//! - `Capped`: give up after `max_attempts` consecutive failed cycles
//! - `Unbounded`: retry forever once a session has opened at least once
//!
//! Before the first open, both policies stop after `startup_attempts` so a
//! misconfigured endpoint surfaces as a fatal startup error instead of a
//! silent infinite loop.

use crate::session::state::ReconnectDiagnostics;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_FLOOR: Duration = Duration::from_secs(5);
const DEFAULT_CAP: Duration = Duration::from_secs(300);
const DEFAULT_GROWTH_FACTOR: f64 = 2.0;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_STARTUP_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Stop after `max_attempts` consecutive failures
    #[default]
    Capped,
    /// Retry forever after the first successful open
    Unbounded,
}

/// `[reconnect]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub policy: ReconnectPolicy,

    #[serde(with = "humantime_serde", default = "default_floor")]
    pub floor: Duration,

    #[serde(with = "humantime_serde", default = "default_cap")]
    pub cap: Duration,

    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
}

fn default_floor() -> Duration {
    DEFAULT_FLOOR
}

fn default_cap() -> Duration {
    DEFAULT_CAP
}

fn default_growth_factor() -> f64 {
    DEFAULT_GROWTH_FACTOR
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_startup_attempts() -> u32 {
    DEFAULT_STARTUP_ATTEMPTS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            floor: DEFAULT_FLOOR,
            cap: DEFAULT_CAP,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(format!(
                "reconnect.growth_factor must be >= 1.0, got {}",
                self.growth_factor
            ));
        }
        if self.floor.is_zero() {
            return Err("reconnect.floor must be greater than zero".to_string());
        }
        if self.cap < self.floor {
            return Err("reconnect.cap must not be smaller than reconnect.floor".to_string());
        }
        if self.policy == ReconnectPolicy::Capped && self.max_attempts == 0 {
            return Err("reconnect.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Backoff state for one lifecycle manager
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    current: Duration,
    /// A session has opened at least once
    established: bool,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
            current: Duration::ZERO,
            established: false,
        }
    }

    /// Delay before the next attempt, or `None` once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let floor = self.config.floor.min(self.config.cap);
        let next = if self.attempts == 0 {
            floor
        } else {
            let factor = if self.config.growth_factor.is_finite() {
                self.config.growth_factor.max(1.0)
            } else {
                1.0
            };
            let grown_secs = (self.current.as_secs_f64() * factor).min(self.config.cap.as_secs_f64());
            Duration::from_secs_f64(grown_secs)
                .max(self.current)
                .min(self.config.cap)
        };

        self.attempts += 1;
        self.current = next;
        Some(next)
    }

    /// Successful open: back to the floor
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = Duration::ZERO;
        self.established = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_limit()
            .is_some_and(|limit| self.attempts >= limit)
    }

    fn attempt_limit(&self) -> Option<u32> {
        let startup = self.config.startup_attempts;
        match (self.config.policy, self.established) {
            (ReconnectPolicy::Capped, true) => Some(self.config.max_attempts),
            (ReconnectPolicy::Capped, false) => Some(self.config.max_attempts.min(startup)),
            (ReconnectPolicy::Unbounded, true) => None,
            (ReconnectPolicy::Unbounded, false) => Some(startup),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn diagnostics(&self) -> ReconnectDiagnostics {
        ReconnectDiagnostics {
            attempts: self.attempts,
            current_delay: self.current,
        }
    }
}
