//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → envelope.rs (retry counted failures with backoff)
//!     → circuit_breaker.rs (fail fast while the dependency is down)
//!     → state_machine.rs (count outcomes, drive Closed/Open/Half-Open)
//!     → classify (decide which errors count)
//! ```
//!
//! # Design Decisions
//! - Breakers are built once per dependency and shared via Arc
//! - Expected errors are returned to the caller but never trip or retry
//! - Cancellation is cooperative through `CancellationToken`

pub mod backoff;
pub mod circuit_breaker;
pub mod envelope;
pub mod registry;
pub mod retries;
pub mod state_machine;
pub mod typed;
pub mod window;

pub use circuit_breaker::{
    BoxError, Breaker, BreakerError, CircuitBreaker, CircuitState, PassThroughBreaker,
    StateChange, StateListener,
};
pub use envelope::Envelope;
pub use registry::BreakerRegistry;
pub use retries::{Cancelled, Retrier, RetryPolicy};
pub use state_machine::StatefulBreaker;
pub use typed::{execute_typed, Fallback, TypedCallError};
pub use window::Counts;
