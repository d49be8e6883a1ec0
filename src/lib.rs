//! Circuit breaker and retry envelope for calls to external dependencies.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller ──▶ Envelope ──▶ Retrier ──▶ Breaker ──▶ operation ──▶ dependency
//!                                           │
//!                                           ├── Disabled: pass-through
//!                                           └── Stateful: FSM + WindowCounter
//!                                                   │
//!                                                   └── Classifier (database,
//!                                                       cache, http, workflow)
//! ```

pub mod classify;
pub mod config;
pub mod observability;
pub mod resilience;

pub use classify::{BackendKind, Classifier};
pub use config::schema::{BreakerConfig, EnvelopeConfig, RetryConfig};
pub use resilience::{
    execute_typed, Breaker, BreakerError, BreakerRegistry, Cancelled, CircuitBreaker,
    CircuitState, Envelope, Retrier, RetryPolicy,
};
