//! Error classification.
//!
//! # Responsibilities
//! - Decide whether a failed call is an expected business outcome
//!   (not-found, validation, auth) or an availability failure
//! - Provide one default classifier per backend kind
//!
//! # Data Flow
//! ```text
//! operation error
//!     → chain walk (error + every source())
//!     → backend vocabulary (database.rs / cache.rs / http.rs / workflow.rs)
//!     → shared rules (cancellation, io::ErrorKind, tokio timeouts)
//!     → verdict: true = ignore, false = count
//! ```
//!
//! # Design Decisions
//! - Classifiers are pure functions over `&(dyn Error + 'static)`, so any
//!   error type can flow through a breaker
//! - The first link in the chain that either layer recognises decides
//! - Unrecognised errors count against the breaker in every backend

pub mod cache;
pub mod database;
pub mod http;
pub mod workflow;

use std::error::Error;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resilience::retries::Cancelled;

/// Returns `true` when the error is an expected outcome that must not count
/// against a breaker and must not be retried.
pub type Classifier = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Backend kinds with a built-in classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Database,
    Cache,
    HttpClient,
    WorkflowClient,
    /// Only the shared rules apply.
    #[default]
    Generic,
}

impl BackendKind {
    /// Default classifier for this backend kind.
    pub fn classifier(self) -> Classifier {
        match self {
            BackendKind::Database => database(),
            BackendKind::Cache => cache(),
            BackendKind::HttpClient => http_client(),
            BackendKind::WorkflowClient => workflow_client(),
            BackendKind::Generic => generic(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Database => "database",
            BackendKind::Cache => "cache",
            BackendKind::HttpClient => "http_client",
            BackendKind::WorkflowClient => "workflow_client",
            BackendKind::Generic => "generic",
        }
    }
}

/// Classifier for SQL databases.
pub fn database() -> Classifier {
    Arc::new(database::is_expected)
}

/// Classifier for key-value caches.
pub fn cache() -> Classifier {
    Arc::new(cache::is_expected)
}

/// Classifier for outbound HTTP calls.
pub fn http_client() -> Classifier {
    Arc::new(http::is_expected)
}

/// Classifier for workflow-orchestration RPCs.
pub fn workflow_client() -> Classifier {
    Arc::new(workflow::is_expected)
}

/// Classifier that applies only the rules shared by every backend.
pub fn generic() -> Classifier {
    Arc::new(|err: &(dyn Error + 'static)| classify_chain(err, |_| None))
}

/// Wrap a caller-supplied function as a classifier.
pub fn custom<F>(f: F) -> Classifier
where
    F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Iterate over an error and all of its sources.
pub fn chain<'a>(
    err: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> + 'a {
    std::iter::successors(Some(err), |&e| e.source())
}

/// Walk the chain, asking the backend first and the shared rules second.
///
/// Falls back to `false` (count) when nothing in the chain is recognised.
pub(crate) fn classify_chain<F>(err: &(dyn Error + 'static), backend: F) -> bool
where
    F: Fn(&(dyn Error + 'static)) -> Option<bool>,
{
    for link in chain(err) {
        if let Some(verdict) = backend(link) {
            return verdict;
        }
        if let Some(verdict) = shared_verdict(link) {
            return verdict;
        }
    }
    false
}

/// Rules every backend agrees on.
fn shared_verdict(err: &(dyn Error + 'static)) -> Option<bool> {
    if err.is::<Cancelled>() {
        return Some(true);
    }
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(false);
    }
    err.downcast_ref::<io::Error>().and_then(io_verdict)
}

fn io_verdict(err: &io::Error) -> Option<bool> {
    use io::ErrorKind::*;

    match err.kind() {
        PermissionDenied | InvalidInput => Some(true),
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | TimedOut | AddrNotAvailable | UnexpectedEof => Some(false),
        _ => None,
    }
}
