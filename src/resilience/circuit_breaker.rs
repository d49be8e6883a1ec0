//! Circuit breaker contract and the configured breaker.
//!
//! # Responsibilities
//! - Define the `CircuitBreaker` capability shared by every breaker
//! - Provide a pass-through variant for disabled breakers
//! - Build the right variant from a `BreakerConfig`
//!
//! # States
//! - **Closed**: calls pass, counted failures are tallied
//! - **Open**: calls are rejected until `open_timeout` elapses
//! - **Half-Open**: a bounded number of probe calls decide recovery
//!
//! # Design Decisions
//! - The trait is object safe; callers holding `&dyn CircuitBreaker` go
//!   through erased futures and values, see `resilience::typed`
//! - `Breaker` also exposes generic methods that keep the caller's error
//!   type intact

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::classify::Classifier;
use crate::config::BreakerConfig;
use crate::resilience::retries::Cancelled;
use crate::resilience::state_machine::StatefulBreaker;
use crate::resilience::window::Counts;

/// Type-erased operation error.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Type-erased operation value.
pub type ErasedValue = Box<dyn Any + Send>;

/// Callback invoked on each state transition.
pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Error returned by a breaker-guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E = BoxError> {
    /// The breaker is open; the operation was not invoked.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The half-open probe quota is taken; the operation was not invoked.
    #[error("circuit breaker '{name}' is half-open and has no probe slots left")]
    TooManyProbes { name: String },

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker refused the call.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            BreakerError::Open { .. } | BreakerError::TooManyProbes { .. }
        )
    }

    /// The operation's error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: From<Cancelled>> From<Cancelled> for BreakerError<E> {
    fn from(cancelled: Cancelled) -> Self {
        BreakerError::Operation(E::from(cancelled))
    }
}

/// The breaker capability.
///
/// `execute` runs a side-effecting operation. `execute_with_result` runs an
/// operation whose value is carried as [`ErasedValue`]. When a call is
/// rejected the operation future is dropped without being polled.
pub trait CircuitBreaker: Send + Sync {
    fn name(&self) -> &str;

    fn execute<'a>(
        &'a self,
        op: BoxFuture<'a, Result<(), BoxError>>,
    ) -> BoxFuture<'a, Result<(), BreakerError>>;

    fn execute_with_result<'a>(
        &'a self,
        op: BoxFuture<'a, Result<ErasedValue, BoxError>>,
    ) -> BoxFuture<'a, Result<ErasedValue, BreakerError>>;
}

/// Breaker used when a configuration sets `enabled = false`.
///
/// Runs every operation exactly once and passes its result through.
#[derive(Debug, Clone)]
pub struct PassThroughBreaker {
    name: String,
}

impl PassThroughBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CircuitBreaker for PassThroughBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        op: BoxFuture<'a, Result<(), BoxError>>,
    ) -> BoxFuture<'a, Result<(), BreakerError>> {
        Box::pin(async move { op.await.map_err(BreakerError::Operation) })
    }

    fn execute_with_result<'a>(
        &'a self,
        op: BoxFuture<'a, Result<ErasedValue, BoxError>>,
    ) -> BoxFuture<'a, Result<ErasedValue, BreakerError>> {
        Box::pin(async move { op.await.map_err(BreakerError::Operation) })
    }
}

/// A breaker built from configuration.
#[derive(Debug)]
pub enum Breaker {
    Disabled(PassThroughBreaker),
    Stateful(StatefulBreaker),
}

impl Breaker {
    pub fn new(config: &BreakerConfig, classifier: Classifier) -> Self {
        if config.enabled {
            Breaker::Stateful(StatefulBreaker::new(config, classifier))
        } else {
            tracing::info!(breaker = %config.name, "Circuit breaker disabled, calls pass through");
            Breaker::Disabled(PassThroughBreaker::new(config.name.clone()))
        }
    }

    /// Build with the classifier of the configured backend kind.
    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config, config.kind.classifier())
    }

    /// Attach a transition listener. Disabled breakers never transition.
    pub fn with_listener(self, listener: StateListener) -> Self {
        match self {
            Breaker::Stateful(breaker) => Breaker::Stateful(breaker.with_listener(listener)),
            disabled => disabled,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Breaker::Disabled(breaker) => &breaker.name,
            Breaker::Stateful(breaker) => breaker.name(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Breaker::Stateful(_))
    }

    /// Current state. A disabled breaker always reports Closed.
    pub fn state(&self) -> CircuitState {
        match self {
            Breaker::Disabled(_) => CircuitState::Closed,
            Breaker::Stateful(breaker) => breaker.state(),
        }
    }

    pub fn counts(&self) -> Counts {
        match self {
            Breaker::Disabled(_) => Counts::default(),
            Breaker::Stateful(breaker) => breaker.counts(),
        }
    }

    pub fn reset(&self) {
        if let Breaker::Stateful(breaker) = self {
            breaker.reset();
        }
    }

    pub async fn execute<E, F, Fut>(&self, op: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Error + 'static,
    {
        self.execute_with_result(op).await
    }

    pub async fn execute_with_result<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        match self {
            Breaker::Disabled(_) => op().await.map_err(BreakerError::Operation),
            Breaker::Stateful(breaker) => breaker.execute_with_result(op).await,
        }
    }
}

impl CircuitBreaker for Breaker {
    fn name(&self) -> &str {
        Breaker::name(self)
    }

    fn execute<'a>(
        &'a self,
        op: BoxFuture<'a, Result<(), BoxError>>,
    ) -> BoxFuture<'a, Result<(), BreakerError>> {
        match self {
            Breaker::Disabled(breaker) => CircuitBreaker::execute(breaker, op),
            Breaker::Stateful(breaker) => CircuitBreaker::execute(breaker, op),
        }
    }

    fn execute_with_result<'a>(
        &'a self,
        op: BoxFuture<'a, Result<ErasedValue, BoxError>>,
    ) -> BoxFuture<'a, Result<ErasedValue, BreakerError>> {
        match self {
            Breaker::Disabled(breaker) => CircuitBreaker::execute_with_result(breaker, op),
            Breaker::Stateful(breaker) => CircuitBreaker::execute_with_result(breaker, op),
        }
    }
}
