//! SQL database errors.
//!
//! Classification keys off the SQLSTATE class (the first two characters of
//! the five-character code). Caller-caused classes are ignored; connection,
//! resource and server-side classes count.

use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

use super::classify_chain;

/// A five-character SQLSTATE code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlState(String);

impl SqlState {
    pub const UNIQUE_VIOLATION: &'static str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &'static str = "23503";
    pub const SYNTAX_ERROR: &'static str = "42601";
    pub const INSUFFICIENT_PRIVILEGE: &'static str = "42501";
    pub const CONNECTION_FAILURE: &'static str = "08006";
    pub const TOO_MANY_CONNECTIONS: &'static str = "53300";
    pub const SERIALIZATION_FAILURE: &'static str = "40001";
    pub const ADMIN_SHUTDOWN: &'static str = "57P01";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// The two-character class, e.g. `23` for integrity constraint violations.
    pub fn class(&self) -> &str {
        self.0.get(..2).unwrap_or("")
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by a SQL executor.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The query matched no rows.
    #[error("no rows in result set")]
    NoRows,

    /// The server rejected the statement.
    #[error("database error {code}: {message}")]
    Server { code: SqlState, message: String },

    /// The connection could not be established or was lost.
    #[error("database connection failed")]
    Connection(#[source] io::Error),

    /// No pooled connection became available in time.
    #[error("timed out acquiring a database connection")]
    PoolTimeout,
}

impl DatabaseError {
    pub fn server(code: &str, message: impl Into<String>) -> Self {
        DatabaseError::Server {
            code: SqlState::new(code),
            message: message.into(),
        }
    }
}

/// Default database classifier. Unrecognised errors count.
pub fn is_expected(err: &(dyn Error + 'static)) -> bool {
    classify_chain(err, verdict)
}

fn verdict(err: &(dyn Error + 'static)) -> Option<bool> {
    match err.downcast_ref::<DatabaseError>()? {
        DatabaseError::NoRows => Some(true),
        DatabaseError::Server { code, .. } => sqlstate_verdict(code),
        DatabaseError::Connection(_) | DatabaseError::PoolTimeout => Some(false),
    }
}

fn sqlstate_verdict(code: &SqlState) -> Option<bool> {
    match code.class() {
        // data exception, integrity constraint, syntax/access rule,
        // invalid authorization, with-check-option, cardinality, unsupported feature
        "22" | "23" | "42" | "28" | "44" | "21" | "0A" => Some(true),
        // connection, transaction rollback, insufficient resources,
        // operator intervention, system error, internal error
        "08" | "40" | "53" | "57" | "58" | "XX" => Some(false),
        _ => None,
    }
}
