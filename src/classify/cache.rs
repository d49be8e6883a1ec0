//! Key-value cache errors.
//!
//! Server replies are classified by their leading error token
//! (`WRONGTYPE`, `CLUSTERDOWN`, ...), the way the server itself tags them.

use std::error::Error;
use std::io;

use thiserror::Error;

use super::classify_chain;

/// Errors surfaced by a cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key does not exist.
    #[error("cache: nil")]
    Nil,

    /// Error reply from the server, e.g. `WRONGTYPE Operation against a key...`.
    #[error("{0}")]
    Reply(String),

    /// The connection could not be established or was lost.
    #[error("cache connection failed")]
    Connection(#[source] io::Error),

    /// No pooled connection became available in time.
    #[error("timed out acquiring a cache connection")]
    PoolTimeout,
}

/// Default cache classifier. Unrecognised errors count.
pub fn is_expected(err: &(dyn Error + 'static)) -> bool {
    classify_chain(err, verdict)
}

fn verdict(err: &(dyn Error + 'static)) -> Option<bool> {
    match err.downcast_ref::<CacheError>()? {
        CacheError::Nil => Some(true),
        CacheError::Reply(reply) => reply_verdict(reply),
        CacheError::Connection(_) | CacheError::PoolTimeout => Some(false),
    }
}

fn reply_verdict(reply: &str) -> Option<bool> {
    let token = reply.split_whitespace().next().unwrap_or("");
    match token.to_ascii_uppercase().as_str() {
        "WRONGTYPE" | "NOAUTH" | "NOPERM" | "WRONGPASS" | "NOSCRIPT" => Some(true),
        "CLUSTERDOWN" | "MASTERDOWN" | "LOADING" | "READONLY" | "TRYAGAIN" | "BUSY" | "OOM" => {
            Some(false)
        }
        "ERR" if reply.contains("max number of clients reached") => Some(false),
        "ERR" if is_malformed_command(reply) => Some(true),
        _ => None,
    }
}

/// Generic `ERR` replies caused by the command itself.
fn is_malformed_command(reply: &str) -> bool {
    const PHRASES: [&str; 5] = [
        "wrong number of arguments",
        "unknown command",
        "syntax error",
        "value is not an integer",
        "value is not a valid float",
    ];
    let reply = reply.to_ascii_lowercase();
    PHRASES.iter().any(|phrase| reply.contains(phrase))
}
