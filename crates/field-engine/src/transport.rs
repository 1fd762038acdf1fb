// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Batched HTTP transport for upstream weather APIs.
//!
//! Fetchers talk to upstream through the [`Transport`] trait so tests can
//! script responses. [`HttpTransport`] enforces a per-request timeout and
//! retries transient failures (connect errors, timeouts, 5xx, 429) with
//! exponential backoff. Client errors are returned immediately.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use log::{debug, warn};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::TransportConfig;

/// Boxed `Send` future used at the trait-object seams of the engine.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur while fetching from upstream.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::Status { status } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Timeout(_) => true,
            Self::Malformed(_) => false,
        }
    }
}

/// Issues one GET with query parameters and decodes the body as JSON.
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        query: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<Value, FetchError>>;
}

/// `reqwest`-backed transport with timeout and bounded retry.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wxgrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    async fn get_once(&self, url: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let timeout = self.config.timeout();
        let request = self.client.get(url).query(query).timeout(timeout).send();

        let response = match tokio::time::timeout(timeout, request).await {
            Ok(response) => response?,
            Err(_elapsed) => return Err(FetchError::Timeout(timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

impl Transport for HttpTransport {
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        query: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<Value, FetchError>> {
        Box::pin(async move {
            let mut backoff = self.config.initial_backoff();
            let mut attempt = 0;

            loop {
                match self.get_once(url, query).await {
                    Ok(value) => {
                        debug!("GET {} succeeded after {} retries", url, attempt);
                        return Ok(value);
                    }
                    Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                        attempt += 1;
                        warn!(
                            "GET {} failed ({}), retry {} of {} in {:?}",
                            url, e, attempt, self.config.max_retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned responses in order, one per connection; repeats the last.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/v1/forecast"), hits)
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            timeout_secs: 5,
            max_retries: 2,
            initial_backoff_ms: 1,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Status { status: 503 }.is_transient());
        assert!(FetchError::Status { status: 429 }.is_transient());
        assert!(!FetchError::Status { status: 404 }.is_transient());
        assert!(!FetchError::Status { status: 400 }.is_transient());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!FetchError::Malformed("eof".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_connect_errors_retry_but_invalid_urls_do_not() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport = HttpTransport::new(fast_config()).unwrap();

        let refused = transport
            .get_json(&format!("http://{addr}/v1/forecast"), &[])
            .await
            .unwrap_err();
        assert!(matches!(refused, FetchError::Request(_)));
        assert!(refused.is_transient());

        let invalid = transport.get_json("not a url", &[]).await.unwrap_err();
        assert!(matches!(invalid, FetchError::Request(_)));
        assert!(!invalid.is_transient());
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let (url, hits) = serve(vec![(503, "{}"), (200, r#"{"ok":true}"#)]).await;
        let transport = HttpTransport::new(fast_config()).unwrap();

        let value = transport.get_json(&url, &[]).await.unwrap();
        assert_eq!(value["ok"], Value::Bool(true));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let (url, hits) = serve(vec![(404, "{}"), (200, "{}")]).await;
        let transport = HttpTransport::new(fast_config()).unwrap();

        let err = transport.get_json(&url, &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404 }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (url, hits) = serve(vec![(500, "{}")]).await;
        let transport = HttpTransport::new(fast_config()).unwrap();

        let err = transport.get_json(&url, &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500 }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (url, _hits) = serve(vec![(200, "not json")]).await;
        let transport = HttpTransport::new(fast_config()).unwrap();

        let err = transport.get_json(&url, &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
