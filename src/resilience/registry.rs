//! Breakers built once at startup, looked up by dependency name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::classify::Classifier;
use crate::config::schema::EnvelopeConfig;
use crate::resilience::circuit_breaker::{Breaker, StateListener};
use crate::resilience::envelope::Envelope;
use crate::resilience::retries::{Retrier, RetryPolicy};

/// A breaker and the classifier it was built with.
#[derive(Clone)]
struct Entry {
    breaker: Arc<Breaker>,
    classifier: Classifier,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: HashMap<String, Entry>,
    /// Configuration order, for stable iteration.
    order: Vec<String>,
    retry: RetryPolicy,
}

impl BreakerRegistry {
    /// One breaker per configured dependency, each with its backend kind's
    /// default classifier.
    pub fn from_config(config: &EnvelopeConfig) -> Self {
        Self::build(config, None)
    }

    /// Like [`from_config`](Self::from_config), with `listener` attached to
    /// every enabled breaker.
    pub fn with_listener(config: &EnvelopeConfig, listener: StateListener) -> Self {
        Self::build(config, Some(listener))
    }

    fn build(config: &EnvelopeConfig, listener: Option<StateListener>) -> Self {
        let mut registry = Self {
            retry: RetryPolicy::from(&config.retry),
            ..Self::default()
        };

        for breaker_config in &config.breakers {
            let classifier = breaker_config.kind.classifier();
            let mut breaker = Breaker::new(breaker_config, classifier.clone());
            if let Some(listener) = &listener {
                breaker = breaker.with_listener(listener.clone());
            }

            let name = breaker_config.name.clone();
            let entry = Entry {
                breaker: Arc::new(breaker),
                classifier,
            };
            if registry.breakers.insert(name.clone(), entry).is_none() {
                registry.order.push(name);
            }
        }

        tracing::info!(breakers = registry.len(), "Breaker registry built");
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<Breaker>> {
        self.breakers.get(name).map(|entry| entry.breaker.clone())
    }

    /// The classifier the named breaker was built with.
    pub fn classifier(&self, name: &str) -> Option<Classifier> {
        self.breakers.get(name).map(|entry| entry.classifier.clone())
    }

    /// Breakers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Breaker>> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.breakers.get(name))
            .map(|entry| &entry.breaker)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// The configured retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Compose the named breaker with the configured retry policy.
    ///
    /// The envelope shares the breaker's classifier, so errors the breaker
    /// ignores are never retried.
    pub fn envelope(&self, name: &str) -> Option<Envelope> {
        let entry = self.breakers.get(name)?;
        Some(Envelope::new(
            entry.breaker.clone(),
            Retrier::named(name, self.retry.clone()),
            entry.classifier.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::classify::database::DatabaseError;
    use crate::resilience::circuit_breaker::{BreakerError, CircuitState};
    use crate::resilience::retries::Cancelled;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, thiserror::Error)]
    enum CallError {
        #[error("query failed")]
        Db(#[source] DatabaseError),
        #[error(transparent)]
        Cancelled(#[from] Cancelled),
    }

    const CONFIG: &str = r#"
        [retry]
        max_attempts = 5

        [[breakers]]
        name = "orders-db"
        kind = "database"

        [[breakers]]
        name = "session-cache"
        kind = "cache"
        enabled = false
    "#;

    #[test]
    fn test_builds_each_breaker() {
        let config = parse_config(CONFIG).unwrap();
        let registry = BreakerRegistry::from_config(&config);

        assert_eq!(registry.len(), 2);
        assert!(registry.get("orders-db").unwrap().is_enabled());
        assert!(!registry.get("session-cache").unwrap().is_enabled());
        assert!(registry.get("missing").is_none());

        let names: Vec<_> = registry.iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, vec!["orders-db", "session-cache"]);
    }

    #[test]
    fn test_envelope_uses_configured_retry() {
        let config = parse_config(CONFIG).unwrap();
        let registry = BreakerRegistry::from_config(&config);

        let envelope = registry.envelope("orders-db").unwrap();
        assert_eq!(envelope.retrier().policy().max_attempts, 5);
        assert_eq!(envelope.breaker().state(), CircuitState::Closed);
        assert!(registry.envelope("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelope_shares_breaker_classifier() {
        let config = parse_config(CONFIG).unwrap();
        let registry = BreakerRegistry::from_config(&config);
        let envelope = registry.envelope("orders-db").unwrap();

        let duplicate = DatabaseError::server("23505", "duplicate key");
        assert!(registry.classifier("orders-db").unwrap()(&duplicate));

        let calls = AtomicU32::new(0);
        let result: Result<(), BreakerError<CallError>> = envelope
            .call(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Db(DatabaseError::server("23505", "duplicate key"))) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Operation(CallError::Db(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result: Result<(), BreakerError<CallError>> = envelope
            .call(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Db(DatabaseError::server("08006", "connection failure"))) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
