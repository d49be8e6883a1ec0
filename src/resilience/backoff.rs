//! Exponential backoff with optional jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate the wait that follows a failed attempt.
///
/// `attempt` is zero-based, so the wait after the first failed try is
/// `initial` itself: `initial * coefficient^attempt`, capped at `max` unless
/// `max` is zero. Coefficients below 1 are treated as 1.
pub fn calculate_backoff(attempt: u32, initial: Duration, coefficient: f64, max: Duration) -> Duration {
    let coefficient = if coefficient.is_finite() && coefficient >= 1.0 {
        coefficient
    } else {
        1.0
    };

    let exponent = attempt.min(i32::MAX as u32) as i32;
    let nanos = (initial.as_nanos() as f64 * coefficient.powi(exponent)).round();
    let delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos as u64)
    } else {
        Duration::MAX
    };

    if max.is_zero() {
        delay
    } else {
        delay.min(max)
    }
}

/// Add up to `jitter` (a fraction of `delay`) of random extra wait.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter.is_nan() || jitter <= 0.0 {
        return delay;
    }

    let jitter_range = (delay.as_nanos() as f64 * jitter.min(1.0)) as u64;
    let extra = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    delay.saturating_add(Duration::from_nanos(extra))
}
