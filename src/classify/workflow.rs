//! Workflow-orchestration RPC errors.

use std::error::Error;

use thiserror::Error;

use super::classify_chain;

/// RPC status codes returned by the workflow service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// Errors surfaced by a workflow client.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow execution already started: {workflow_id}")]
    AlreadyStarted { workflow_id: String },

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("namespace {0} is not active")]
    NamespaceNotActive(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("workflow rpc failed ({code:?}): {message}")]
    Rpc { code: StatusCode, message: String },
}

impl WorkflowError {
    pub fn rpc(code: StatusCode, message: impl Into<String>) -> Self {
        WorkflowError::Rpc {
            code,
            message: message.into(),
        }
    }
}

/// Default workflow classifier. Unrecognised errors count.
pub fn is_expected(err: &(dyn Error + 'static)) -> bool {
    classify_chain(err, verdict)
}

fn verdict(err: &(dyn Error + 'static)) -> Option<bool> {
    match err.downcast_ref::<WorkflowError>()? {
        WorkflowError::AlreadyStarted { .. }
        | WorkflowError::NamespaceNotFound(_)
        | WorkflowError::NamespaceNotActive(_)
        | WorkflowError::QueryFailed(_) => Some(true),
        WorkflowError::Rpc { code, .. } => Some(code_is_expected(*code)),
    }
}

fn code_is_expected(code: StatusCode) -> bool {
    use StatusCode::*;

    match code {
        Cancelled | InvalidArgument | NotFound | AlreadyExists | PermissionDenied
        | FailedPrecondition | Unauthenticated | OutOfRange => true,
        Unavailable | DeadlineExceeded | ResourceExhausted | Internal | DataLoss | Aborted
        | Unknown | Unimplemented => false,
    }
}
