//! Stateful circuit breaker.
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive counted failures >= threshold
//! Closed → Closed:    closed-window interval elapsed (fixed window resets)
//! Open → Half-Open:   first call after open_timeout (no background timer)
//! Half-Open → Closed: max_half_open_requests probes succeeded
//! Half-Open → Open:   any probe fails
//! ```
//!
//! # Design Decisions
//! - One mutex per breaker; it guards admission and recording only and is
//!   never held while the operation runs
//! - Every transition starts a new generation; results from calls admitted
//!   in an older generation are discarded
//! - A probe whose future is dropped releases its half-open slot without
//!   counting as success or failure

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::classify::Classifier;
use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    BoxError, BreakerError, CircuitBreaker, CircuitState, ErasedValue, StateChange, StateListener,
};
use crate::resilience::window::{Counts, WindowCounter};

/// How a finished call is booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    /// Failed, but the classifier called it an expected outcome.
    Ignored,
    Failure,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Ignored => "ignored",
            Outcome::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Open,
    TooManyProbes,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Rejection::Open => "open",
            Rejection::TooManyProbes => "too_many_probes",
        }
    }
}

struct Inner {
    state: CircuitState,
    generation: u64,
    counter: WindowCounter,
    /// End of the current fixed Closed window, or of the Open timeout.
    expiry: Option<Instant>,
    probes_in_flight: u32,
    probe_successes: u32,
}

/// Circuit breaker backed by a state machine and a classifier.
pub struct StatefulBreaker {
    name: String,
    half_open_quota: u32,
    failure_threshold: u32,
    open_timeout: Duration,
    closed_window: Option<Duration>,
    classifier: Classifier,
    listener: Option<StateListener>,
    inner: Mutex<Inner>,
}

impl StatefulBreaker {
    pub fn new(config: &BreakerConfig, classifier: Classifier) -> Self {
        let now = Instant::now();
        let closed_window = config.closed_window_interval();
        let counter = WindowCounter::new(closed_window, config.bucket_period(), now);
        let expiry = if counter.is_rolling() {
            None
        } else {
            closed_window.and_then(|window| now.checked_add(window))
        };

        metrics::record_state(&config.name, CircuitState::Closed);
        tracing::debug!(
            breaker = %config.name,
            threshold = config.failure_threshold(),
            open_timeout = ?config.open_timeout(),
            rolling = counter.is_rolling(),
            "Circuit breaker created"
        );

        Self {
            name: config.name.clone(),
            half_open_quota: config.half_open_quota(),
            failure_threshold: config.failure_threshold(),
            open_timeout: config.open_timeout(),
            closed_window,
            classifier,
            listener: None,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counter,
                expiry,
                probes_in_flight: 0,
                probe_successes: 0,
            }),
        }
    }

    /// Register a callback invoked on every transition.
    ///
    /// The callback runs while the breaker's lock is held and must not call
    /// back into this breaker.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, now)
    }

    pub fn counts(&self) -> Counts {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, now);
        inner.counter.counts(now)
    }

    /// Whether the classifier treats `err` as an expected outcome.
    pub fn is_expected(&self, err: &(dyn Error + 'static)) -> bool {
        (self.classifier)(err)
    }

    /// Force the breaker back to Closed with empty counters.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed {
            self.new_generation(&mut inner, now);
        } else {
            self.set_state(&mut inner, CircuitState::Closed, now);
        }
    }

    /// Run a side-effecting operation through the breaker.
    pub async fn execute<E, F, Fut>(&self, op: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Error + 'static,
    {
        self.execute_with_result(op).await
    }

    /// Run an operation through the breaker and hand back its value.
    pub async fn execute_with_result<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        self.guarded(op, |err: &E| (self.classifier)(err)).await
    }

    async fn guarded<T, E, F, Fut, C>(&self, op: F, is_expected: C) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let permit = match self.admit() {
            Ok(permit) => permit,
            Err(rejection) => return Err(self.rejected(rejection)),
        };

        let result = op().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(err) if is_expected(err) => Outcome::Ignored,
            Err(_) => Outcome::Failure,
        };
        metrics::record_call(&self.name, outcome.as_str());
        permit.complete(outcome);

        result.map_err(BreakerError::Operation)
    }

    fn admit(&self) -> Result<Permit<'_>, Rejection> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match self.current_state(&mut inner, now) {
            CircuitState::Open => return Err(Rejection::Open),
            CircuitState::HalfOpen => {
                if inner.probes_in_flight + inner.probe_successes >= self.half_open_quota {
                    return Err(Rejection::TooManyProbes);
                }
                inner.probes_in_flight += 1;
            }
            CircuitState::Closed => {}
        }

        inner.counter.on_request(now);
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            completed: false,
        })
    }

    fn record(&self, generation: u64, outcome: Option<Outcome>) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = self.current_state(&mut inner, now);
        if generation != inner.generation {
            return;
        }

        if state == CircuitState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match outcome {
            Some(Outcome::Success | Outcome::Ignored) => self.on_success(&mut inner, state, now),
            Some(Outcome::Failure) => self.on_failure(&mut inner, state, now),
            None => {}
        }
    }

    fn on_success(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => inner.counter.on_success(now),
            CircuitState::HalfOpen => {
                inner.counter.on_success(now);
                inner.probe_successes += 1;
                if inner.probe_successes >= self.half_open_quota {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                inner.counter.on_failure(now);
                if inner.counter.counts(now).consecutive_failures >= self.failure_threshold {
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) -> CircuitState {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            CircuitState::Closed if expired => {
                tracing::trace!(breaker = %self.name, "Closed window elapsed, counters reset");
                self.new_generation(inner, now);
            }
            CircuitState::Open if expired => {
                self.set_state(inner, CircuitState::HalfOpen, now);
            }
            _ => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        self.new_generation(inner, now);
        self.announce(StateChange {
            name: self.name.clone(),
            from,
            to,
        });
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counter.clear();
        inner.probes_in_flight = 0;
        inner.probe_successes = 0;
        inner.expiry = match inner.state {
            CircuitState::Closed if !inner.counter.is_rolling() => {
                self.closed_window.and_then(|window| now.checked_add(window))
            }
            CircuitState::Open => now.checked_add(self.open_timeout),
            _ => None,
        };
    }

    fn announce(&self, change: StateChange) {
        if change.to == CircuitState::Open {
            tracing::warn!(
                breaker = %change.name,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            );
        } else {
            tracing::info!(
                breaker = %change.name,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            );
        }
        metrics::record_transition(&change.name, change.from, change.to);

        if let Some(listener) = &self.listener {
            listener(&change);
        }
    }

    fn rejected<E>(&self, rejection: Rejection) -> BreakerError<E> {
        metrics::record_rejection(&self.name, rejection.as_str());
        tracing::debug!(breaker = %self.name, reason = rejection.as_str(), "Call rejected");

        match rejection {
            Rejection::Open => BreakerError::Open {
                name: self.name.clone(),
            },
            Rejection::TooManyProbes => BreakerError::TooManyProbes {
                name: self.name.clone(),
            },
        }
    }
}

impl fmt::Debug for StatefulBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .field("failure_threshold", &self.failure_threshold)
            .field("open_timeout", &self.open_timeout)
            .field("half_open_quota", &self.half_open_quota)
            .finish()
    }
}

impl CircuitBreaker for StatefulBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        op: BoxFuture<'a, Result<(), BoxError>>,
    ) -> BoxFuture<'a, Result<(), BreakerError>> {
        Box::pin(self.guarded(move || op, |err: &BoxError| (self.classifier)(&**err)))
    }

    fn execute_with_result<'a>(
        &'a self,
        op: BoxFuture<'a, Result<ErasedValue, BoxError>>,
    ) -> BoxFuture<'a, Result<ErasedValue, BreakerError>> {
        Box::pin(self.guarded(move || op, |err: &BoxError| (self.classifier)(&**err)))
    }
}

/// Admission ticket for one call.
struct Permit<'a> {
    breaker: &'a StatefulBreaker,
    generation: u64,
    completed: bool,
}

impl Permit<'_> {
    fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        self.breaker.record(self.generation, Some(outcome));
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.record(self.generation, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            consecutive_failure_threshold: threshold,
            open_timeout_ms: 1_000,
            ..BreakerConfig::named("orders-db")
        }
    }

    fn refused() -> io::Error {
        io::Error::from(io::ErrorKind::ConnectionRefused)
    }

    async fn fail(breaker: &StatefulBreaker) -> Result<(), BreakerError<io::Error>> {
        breaker.execute(|| async { Err(refused()) }).await
    }

    async fn succeed(breaker: &StatefulBreaker) -> Result<(), BreakerError<io::Error>> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold() {
        let breaker = StatefulBreaker::new(&config(3), classify::generic());

        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Operation(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), BreakerError<io::Error>> = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_breaks_the_streak() {
        let breaker = StatefulBreaker::new(&config(3), classify::generic());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        let counts = breaker.counts();
        assert_eq!(counts.requests, 4);
        assert_eq!(counts.total_failures, 3);
        assert_eq!(counts.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_errors_never_trip() {
        let breaker = StatefulBreaker::new(&config(2), classify::generic());

        for _ in 0..50 {
            let result: Result<(), BreakerError<io::Error>> = breaker
                .execute(|| async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) })
                .await;
            let err = result.unwrap_err();
            assert!(matches!(err, BreakerError::Operation(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts().total_successes, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let breaker = StatefulBreaker::new(&config(1), classify::generic());
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_timer() {
        let breaker = StatefulBreaker::new(&config(1), classify::generic());
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Operation(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));

        tokio::time::advance(Duration::from_millis(500)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_quota_requires_all_probes() {
        let config = BreakerConfig {
            max_half_open_requests: 2,
            ..config(1)
        };
        let breaker = StatefulBreaker::new(&config, classify::generic());
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let breaker = StatefulBreaker::new(&config(1), classify::generic());
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        {
            let pending = breaker.execute(|| async {
                std::future::pending::<Result<(), io::Error>>().await
            });
            let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_resets_counters() {
        let config = BreakerConfig {
            closed_window_interval_ms: 1_000,
            ..config(3)
        };
        let breaker = StatefulBreaker::new(&config, classify::generic());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.counts(), Counts::default());

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_forgets_old_failures() {
        let config = BreakerConfig {
            closed_window_interval_ms: 10_000,
            bucket_period_ms: 1_000,
            ..config(3)
        };
        let breaker = StatefulBreaker::new(&config, classify::generic());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts().consecutive_failures, 1);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_every_transition() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let breaker = StatefulBreaker::new(&config(1), classify::generic())
            .with_listener(Arc::new(move |change: &StateChange| {
                sink.lock().push((change.from, change.to));
            }));

        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&breaker).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_breaker() {
        let breaker = StatefulBreaker::new(&config(1), classify::generic());
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();
    }
}
