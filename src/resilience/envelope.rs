//! Breaker and retry composed around one dependency.
//!
//! # Data Flow
//! ```text
//! call → Retrier → Breaker → operation
//!          ↑          │
//!          └──────────┘ retry only counted operation failures
//! ```
//!
//! Rejections (open, probe quota) and errors the classifier treats as
//! expected are returned at once.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::classify::Classifier;
use crate::resilience::circuit_breaker::{Breaker, BreakerError};
use crate::resilience::retries::{Cancelled, Retrier};

#[derive(Clone)]
pub struct Envelope {
    breaker: Arc<Breaker>,
    retrier: Retrier,
    classifier: Classifier,
}

impl Envelope {
    pub fn new(breaker: Arc<Breaker>, retrier: Retrier, classifier: Classifier) -> Self {
        Self {
            breaker,
            retrier,
            classifier,
        }
    }

    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Run `op` through the breaker, retrying counted failures.
    ///
    /// `op` receives the zero-based attempt index. Each attempt builds its
    /// future before the breaker decides on admission, so side effects must
    /// live inside the returned future.
    pub async fn call<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + From<Cancelled> + 'static,
    {
        let breaker = &self.breaker;
        let classifier = &self.classifier;

        self.retrier
            .run_if(
                cancel,
                move |attempt| {
                    let fut = op(attempt);
                    breaker.execute_with_result(move || fut)
                },
                |result: &Result<T, BreakerError<E>>| match result {
                    Err(BreakerError::Operation(err)) => !classifier(err),
                    _ => false,
                },
            )
            .await
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("breaker", &self.breaker)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::config::BreakerConfig;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::retries::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum CallError {
        #[error("backend unavailable")]
        Unavailable,
        #[error("invalid input")]
        Invalid,
        #[error(transparent)]
        Cancelled(#[from] Cancelled),
    }

    fn envelope(threshold: u32, attempts: u32) -> Envelope {
        let config = BreakerConfig {
            consecutive_failure_threshold: threshold,
            ..BreakerConfig::named("inventory")
        };
        let classifier = classify::custom(|err| {
            matches!(err.downcast_ref::<CallError>(), Some(CallError::Invalid))
        });
        let breaker = Arc::new(Breaker::new(&config, classifier.clone()));
        let policy = RetryPolicy {
            max_attempts: attempts,
            ..RetryPolicy::default()
        };
        Envelope::new(breaker, Retrier::named("inventory", policy), classifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_counted_failures() {
        let envelope = envelope(10, 3);
        let calls = AtomicU32::new(0);

        let result = envelope
            .call(&CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(CallError::Unavailable)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_errors_are_not_retried() {
        let envelope = envelope(10, 5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = envelope
            .call(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Invalid) }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Operation(CallError::Invalid))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_stops_retrying() {
        let envelope = envelope(2, 5);
        let executed = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = envelope
            .call(&CancellationToken::new(), |_| {
                let executed = executed.clone();
                async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Unavailable)
                }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(executed.load(Ordering::SeqCst), 2);
        assert_eq!(envelope.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let envelope = envelope(10, 5);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = envelope
            .call(&cancel, |_| async { Err(CallError::Unavailable) })
            .await;

        assert!(matches!(result, Err(BreakerError::Operation(CallError::Unavailable))));
        assert_eq!(envelope.breaker().counts().total_failures, 1);
    }
}
