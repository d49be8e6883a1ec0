//! Retry logic.
//!
//! # Responsibilities
//! - Run an operation up to `max_attempts` times
//! - Sleep with exponential backoff (+ optional jitter) between attempts
//! - Stop promptly when the caller's cancellation token fires
//!
//! # Design Decisions
//! - Exhaustion returns the last result verbatim; no synthetic error
//! - The backoff sleep races the cancellation token
//! - `max_attempts <= 1` is a single direct call with no retry machinery

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, calculate_backoff};

/// The caller cancelled before any attempt produced a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation cancelled by caller")]
pub struct Cancelled;

/// Immutable retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `<= 1` disables retry.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_interval: Duration,
    /// Growth factor between consecutive waits (>= 1).
    pub backoff_coefficient: f64,
    /// Upper bound for a single wait; zero leaves it uncapped.
    pub max_interval: Duration,
    /// Random extra wait as a fraction of the computed delay (0..=1).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_millis(2000),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Wait after the zero-based `attempt`, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_interval,
            self.backoff_coefficient,
            self.max_interval,
        )
    }

    /// Every wait the policy can produce, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|attempt| self.backoff(attempt))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled { config.max_attempts } else { 1 },
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            backoff_coefficient: config.backoff_coefficient,
            max_interval: Duration::from_millis(config.max_interval_ms),
            jitter: config.jitter,
        }
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Retrier {
    name: String,
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::named("default", policy)
    }

    /// A retrier whose log lines and metrics carry `name`.
    pub fn named(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry on any error.
    ///
    /// `op` receives the zero-based attempt index.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        self.run_if(cancel, op, |result: &Result<T, E>| result.is_err()).await
    }

    /// Retry while `should_retry` approves the latest result.
    ///
    /// A token that is already cancelled yields `Cancelled` without invoking
    /// `op`. Cancellation during a backoff returns the last result.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        mut should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&Result<T, E>) -> bool,
        E: From<Cancelled>,
    {
        if !self.policy.is_enabled() {
            return op(0).await;
        }

        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        let mut attempt = 0;
        loop {
            let result = op(attempt).await;
            attempt += 1;

            if !should_retry(&result) {
                return result;
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    retrier = %self.name,
                    attempts = attempt,
                    "Retries exhausted"
                );
                return result;
            }

            let delay = apply_jitter(self.policy.backoff(attempt - 1), self.policy.jitter);
            tracing::info!(
                retrier = %self.name,
                attempt = attempt,
                delay = ?delay,
                "Retrying operation"
            );
            metrics::record_retry_attempt(&self.name);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(retrier = %self.name, attempt = attempt, "Retry cancelled during backoff");
                    return result;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() {
                return result;
            }
        }
    }
}
