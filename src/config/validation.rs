//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Breaker names are present and unique
//! - Retry values are in range
//! - Observability settings parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EnvelopeConfig → Result<(), Vec<ValidationError>>
//! - Zero values that have a documented fallback are accepted

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerConfig, EnvelopeConfig, RetryConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("breaker at index {index} has an empty name")]
    EmptyBreakerName { index: usize },

    #[error("breaker '{0}' is defined more than once")]
    DuplicateBreaker(String),

    #[error("breaker '{name}': bucket_period_ms ({bucket_ms}) exceeds closed_window_interval_ms ({window_ms})")]
    BucketLargerThanWindow {
        name: String,
        bucket_ms: u64,
        window_ms: u64,
    },

    #[error("retry.backoff_coefficient must be a finite number >= 1, got {0}")]
    InvalidBackoffCoefficient(f64),

    #[error("retry.jitter must be within [0, 1], got {0}")]
    InvalidJitter(f64),

    #[error("retry.max_interval_ms ({max_ms}) is below initial_interval_ms ({initial_ms})")]
    MaxIntervalBelowInitial { initial_ms: u64, max_ms: u64 },

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EnvelopeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breakers(&config.breakers, &mut errors);
    validate_retry(&config.retry, &mut errors);

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breakers(breakers: &[BreakerConfig], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();

    for (index, breaker) in breakers.iter().enumerate() {
        if breaker.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBreakerName { index });
        } else if !seen.insert(breaker.name.as_str()) {
            errors.push(ValidationError::DuplicateBreaker(breaker.name.clone()));
        }

        if breaker.is_rolling() && breaker.bucket_period_ms > breaker.closed_window_interval_ms {
            errors.push(ValidationError::BucketLargerThanWindow {
                name: breaker.name.clone(),
                bucket_ms: breaker.bucket_period_ms,
                window_ms: breaker.closed_window_interval_ms,
            });
        }
    }
}

fn validate_retry(retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if !retry.backoff_coefficient.is_finite() || retry.backoff_coefficient < 1.0 {
        errors.push(ValidationError::InvalidBackoffCoefficient(
            retry.backoff_coefficient,
        ));
    }

    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(ValidationError::InvalidJitter(retry.jitter));
    }

    if retry.max_interval_ms != 0 && retry.max_interval_ms < retry.initial_interval_ms {
        errors.push(ValidationError::MaxIntervalBelowInitial {
            initial_ms: retry.initial_interval_ms,
            max_ms: retry.max_interval_ms,
        });
    }
}
