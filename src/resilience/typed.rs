//! Strongly-typed calls through an erased [`CircuitBreaker`].
//!
//! Callers that only hold `&dyn CircuitBreaker` box their value on the way in
//! and downcast it on the way out. Any failure, including a value of the
//! wrong type, hands back the caller's fallback together with the reason.

use std::any::type_name;
use std::error::Error;
use std::future::Future;

use thiserror::Error;

use crate::resilience::circuit_breaker::{BoxError, BreakerError, CircuitBreaker, ErasedValue};

/// Why a typed call fell back.
#[derive(Debug, Error)]
pub enum TypedCallError {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("circuit breaker '{name}' is half-open and has no probe slots left")]
    TooManyProbes { name: String },

    #[error("{0}")]
    Operation(BoxError),

    /// The breaker returned a value that is not the requested type.
    #[error("breaker returned a value that is not a {expected}")]
    TypeMismatch { expected: &'static str },
}

impl TypedCallError {
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, TypedCallError::TypeMismatch { .. })
    }
}

impl From<BreakerError> for TypedCallError {
    fn from(err: BreakerError) -> Self {
        match err {
            BreakerError::Open { name } => TypedCallError::Open { name },
            BreakerError::TooManyProbes { name } => TypedCallError::TooManyProbes { name },
            BreakerError::Operation(err) => TypedCallError::Operation(err),
        }
    }
}

/// The fallback value and the error that caused it.
#[derive(Debug)]
pub struct Fallback<T> {
    pub value: T,
    pub error: TypedCallError,
}

impl<T> Fallback<T> {
    pub fn into_parts(self) -> (T, TypedCallError) {
        (self.value, self.error)
    }
}

/// Run `op` through `breaker` and recover its value as `T`.
///
/// `op` is only invoked if the breaker admits the call.
pub async fn execute_typed<'a, T, E, F, Fut>(
    breaker: &'a dyn CircuitBreaker,
    op: F,
    fallback: T,
) -> Result<T, Fallback<T>>
where
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    let erased = Box::pin(async move {
        match op().await {
            Ok(value) => Ok(Box::new(value) as ErasedValue),
            Err(err) => Err(Box::new(err) as BoxError),
        }
    });

    let value = match breaker.execute_with_result(erased).await {
        Ok(value) => value,
        Err(err) => {
            return Err(Fallback {
                value: fallback,
                error: err.into(),
            })
        }
    };

    match value.downcast::<T>() {
        Ok(value) => Ok(*value),
        Err(_) => {
            tracing::error!(
                breaker = breaker.name(),
                expected = type_name::<T>(),
                "Breaker returned a value of the wrong type"
            );
            Err(Fallback {
                value: fallback,
                error: TypedCallError::TypeMismatch {
                    expected: type_name::<T>(),
                },
            })
        }
    }
}
