//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EnvelopeConfig (validated, immutable)
//!     → BreakerRegistry / RetryPolicy built once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breakers live for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BreakerConfig, EnvelopeConfig, ObservabilityConfig, RetryConfig};
