//! HTTP transport seam for the failover client.
//!
//! The failover loop only needs "GET this URL, give me status and body".
//! Keeping that behind a trait lets tests script per-instance behaviour
//! without a network, the same way enrichment clients are mocked.

use async_trait::async_trait;
use std::time::Duration;

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer (refused, reset, timed out, TLS, ...).
#[derive(Debug, Clone, thiserror::Error)]
#[error("network error: {0}")]
pub struct TransportError(pub String);

/// Minimal GET transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET request to an absolute URL.
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// User agent sent to every backend instance.
const USER_AGENT: &str = concat!("Moonsway/", env!("CARGO_PKG_VERSION"));

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Scripted transports for tests.
#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// What an instance does when hit.
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// Respond with a status and body
        Status(u16, String),
        /// Fail below HTTP
        NetworkError,
        /// Never respond
        Hang,
    }

    impl Reply {
        pub fn ok(body: &str) -> Self {
            Reply::Status(200, body.to_string())
        }

        pub fn status(code: u16) -> Self {
            Reply::Status(code, String::new())
        }
    }

    /// Transport that answers by base URL.
    ///
    /// Each base URL owns a queue of replies; the last reply repeats once
    /// the queue is down to one entry.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        /// Every URL requested, in order
        pub requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script replies for every URL starting with `base`.
        pub fn on(self, base: &str, replies: Vec<Reply>) -> Self {
            self.replies
                .lock()
                .insert(base.to_string(), replies.into_iter().collect());
            self
        }

        /// Number of requests issued so far.
        pub fn attempts(&self) -> usize {
            self.requests.lock().len()
        }

        fn next_reply(&self, url: &str) -> Reply {
            let mut replies = self.replies.lock();
            let Some((_, queue)) = replies.iter_mut().find(|(base, _)| url.starts_with(base.as_str()))
            else {
                return Reply::NetworkError;
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap_or(Reply::NetworkError)
            } else {
                queue.front().cloned().unwrap_or(Reply::NetworkError)
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(url.to_string());
            match self.next_reply(url) {
                Reply::Status(status, body) => Ok(HttpResponse { status, body }),
                Reply::NetworkError => Err(TransportError("connection refused".to_string())),
                Reply::Hang => futures::future::pending().await,
            }
        }
    }
}
