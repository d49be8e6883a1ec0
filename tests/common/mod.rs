//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use envelope::config::BreakerConfig;
use envelope::resilience::Cancelled;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Error type used by scripted operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("dependency unavailable")]
    Unavailable(#[source] io::Error),
    #[error("rejected by business rule")]
    Business(#[source] io::Error),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl TestError {
    /// A failure the shared classifier rules count.
    pub fn unavailable() -> Self {
        TestError::Unavailable(io::Error::from(io::ErrorKind::ConnectionRefused))
    }

    /// A failure the shared classifier rules ignore.
    pub fn business() -> Self {
        TestError::Business(io::Error::from(io::ErrorKind::PermissionDenied))
    }
}

pub fn breaker_config(name: &str, threshold: u32, open_timeout_ms: u64) -> BreakerConfig {
    BreakerConfig {
        consecutive_failure_threshold: threshold,
        open_timeout_ms,
        ..BreakerConfig::named(name)
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` is called once per request and returns the status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut request = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => request.extend_from_slice(&buf[..n]),
                            }
                        }

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
