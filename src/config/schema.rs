//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Durations
//! are stored as integer milliseconds; the resolved accessors on
//! [`BreakerConfig`] apply the documented fallbacks for zero values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::BackendKind;

/// Default time spent Open before probing.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default consecutive failures needed to trip.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Retry policy shared by every dependency.
    pub retry: RetryConfig,

    /// One entry per protected dependency.
    pub breakers: Vec<BreakerConfig>,
}

impl EnvelopeConfig {
    pub fn breaker(&self, name: &str) -> Option<&BreakerConfig> {
        self.breakers.iter().find(|b| b.name == name)
    }
}

/// Circuit breaker settings for one dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Name used in logs, metrics and registry lookups.
    pub name: String,

    /// Backend kind; selects the default error classifier.
    pub kind: BackendKind,

    /// `false` builds a pass-through breaker.
    pub enabled: bool,

    /// Probes allowed while Half-Open (0 means 1).
    pub max_half_open_requests: u32,

    /// Periodic counter reset while Closed (0 disables).
    pub closed_window_interval_ms: u64,

    /// Time spent Open before probing (0 means 60s).
    pub open_timeout_ms: u64,

    /// Consecutive counted failures needed to trip (0 means 5).
    pub consecutive_failure_threshold: u32,

    /// Rolling window bucket size (0 selects a fixed window).
    pub bucket_period_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            kind: BackendKind::default(),
            enabled: true,
            max_half_open_requests: 1,
            closed_window_interval_ms: 0,
            open_timeout_ms: 60_000,
            consecutive_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            bucket_period_ms: 0,
        }
    }
}

impl BreakerConfig {
    /// Defaults with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn half_open_quota(&self) -> u32 {
        self.max_half_open_requests.max(1)
    }

    pub fn open_timeout(&self) -> Duration {
        if self.open_timeout_ms == 0 {
            DEFAULT_OPEN_TIMEOUT
        } else {
            Duration::from_millis(self.open_timeout_ms)
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        if self.consecutive_failure_threshold == 0 {
            DEFAULT_FAILURE_THRESHOLD
        } else {
            self.consecutive_failure_threshold
        }
    }

    pub fn closed_window_interval(&self) -> Option<Duration> {
        (self.closed_window_interval_ms > 0)
            .then(|| Duration::from_millis(self.closed_window_interval_ms))
    }

    pub fn bucket_period(&self) -> Option<Duration> {
        (self.bucket_period_ms > 0).then(|| Duration::from_millis(self.bucket_period_ms))
    }

    /// True when counting uses time buckets rather than a single window.
    pub fn is_rolling(&self) -> bool {
        self.closed_window_interval().is_some() && self.bucket_period().is_some()
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Total attempts including the first (`<= 1` disables retry).
    pub max_attempts: u32,

    /// Wait after the first failed attempt, in milliseconds.
    pub initial_interval_ms: u64,

    /// Growth factor between waits.
    pub backoff_coefficient: f64,

    /// Cap for a single wait in milliseconds (0 = uncapped).
    pub max_interval_ms: u64,

    /// Extra random wait as a fraction of each delay, e.g. 0.1 for 10%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_interval_ms: 100,
            backoff_coefficient: 2.0,
            max_interval_ms: 2000,
            jitter: 0.0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
