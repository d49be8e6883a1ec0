//! Outbound HTTP errors.
//!
//! 4xx responses are caused by the caller and are ignored, except 408 and
//! 429 which signal an overloaded or slow upstream. 5xx responses and
//! transport failures count.

use std::error::Error;
use std::io;

use reqwest::StatusCode;
use thiserror::Error;

use super::classify_chain;

/// Errors surfaced by an HTTP client adapter.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}")]
    Status { status: StatusCode },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or was lost.
    #[error("connection failed")]
    Connect(#[source] io::Error),

    /// The request could not be built (bad URL, header, body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client failed before a response arrived.
    #[error("request failed")]
    Request(#[from] reqwest::Error),
}

impl HttpClientError {
    /// Error for a non-success status code.
    ///
    /// A code outside 100..=999 is not a status and becomes `InvalidRequest`.
    pub fn status(code: u16) -> Self {
        match StatusCode::from_u16(code) {
            Ok(status) => HttpClientError::Status { status },
            Err(_) => HttpClientError::InvalidRequest(format!("invalid status code {code}")),
        }
    }
}

/// Default HTTP classifier. Unrecognised errors count.
pub fn is_expected(err: &(dyn Error + 'static)) -> bool {
    classify_chain(err, verdict)
}

/// Whether a response status is worth another attempt.
///
/// Used as the predicate for status-aware retry: 5xx, 429 and 408 retry,
/// every other status is final.
pub fn retry_on_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn verdict(err: &(dyn Error + 'static)) -> Option<bool> {
    if let Some(err) = err.downcast_ref::<HttpClientError>() {
        return match err {
            HttpClientError::Status { status } => status_verdict(*status),
            HttpClientError::Timeout | HttpClientError::Connect(_) => Some(false),
            HttpClientError::InvalidRequest(_) => Some(true),
            HttpClientError::Request(_) => None,
        };
    }

    let err = err.downcast_ref::<reqwest::Error>()?;
    if let Some(status) = err.status() {
        return status_verdict(status);
    }
    if err.is_timeout() || err.is_connect() {
        return Some(false);
    }
    if err.is_builder() {
        return Some(true);
    }
    // Let the chain walk reach the underlying io::Error, if any.
    None
}

fn status_verdict(status: StatusCode) -> Option<bool> {
    if retry_on_status(status) {
        Some(false)
    } else if status.is_client_error() {
        Some(true)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_ignored() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(is_expected(&HttpClientError::status(code)), "{code}");
        }
    }

    #[test]
    fn test_throttling_and_server_errors_count() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(!is_expected(&HttpClientError::status(code)), "{code}");
        }
    }

    #[test]
    fn test_network_errors_count() {
        assert!(!is_expected(&HttpClientError::Timeout));
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
        ] {
            let err = HttpClientError::Connect(io::Error::from(kind));
            assert!(!is_expected(&err), "{kind:?}");
        }
    }

    #[test]
    fn test_reqwest_builder_error_is_ignored() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(is_expected(&err));
    }

    #[test]
    fn test_out_of_range_status_is_not_a_server_error() {
        let err = HttpClientError::status(99);
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
        assert_eq!(err.to_string(), "invalid request: invalid status code 99");
    }

    #[tokio::test]
    async fn test_connection_refused_counts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect());
        assert!(!is_expected(&err));

        let wrapped = HttpClientError::from(err);
        assert!(!is_expected(&wrapped));
    }

    #[tokio::test]
    async fn test_client_timeout_counts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let err = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .timeout(std::time::Duration::from_millis(50))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!is_expected(&err));
        server.abort();
    }

    #[test]
    fn test_retry_on_status() {
        assert!(retry_on_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(retry_on_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!retry_on_status(StatusCode::NOT_FOUND));
        assert!(!retry_on_status(StatusCode::OK));
    }
}
