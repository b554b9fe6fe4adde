//! Instance failover for outbound requests.
//!
//! Every request is resolved against a pool of interchangeable backend
//! instances. The client picks a random starting instance and rotates
//! through the pool on transient failures, so a single instance being
//! down, rate limited or rejecting auth never fails the caller.
//!
//! # Retry rules
//!
//! | Outcome                    | Action                        |
//! |----------------------------|-------------------------------|
//! | 2xx                        | return                        |
//! | 429                        | short delay, next instance    |
//! | 401 with auth sub-status   | next instance, no delay       |
//! | >= 500                     | next instance, no delay       |
//! | network failure            | short delay, next instance    |
//! | other non-2xx              | record, next instance         |
//! | cancelled                  | abort, never retried          |
//!
//! Attempts are capped at twice the pool size.

mod transport;

#[cfg(test)]
pub use transport::mocks;
pub use transport::{HttpResponse, ReqwestTransport, Transport, TransportError};

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upstream sub-status signalling an instance-side auth problem.
const AUTH_SUB_STATUS: i64 = 11002;

/// Which pool a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Search and catalog lookups
    Metadata,
    /// Stream manifest resolution
    Streaming,
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestClass::Metadata => f.write_str("metadata"),
            RequestClass::Streaming => f.write_str("streaming"),
        }
    }
}

/// Named base-URL lists per request class.
///
/// Immutable once built; order does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancePool {
    /// Instances serving metadata lookups
    pub metadata: Vec<String>,
    /// Instances serving stream manifests
    pub streaming: Vec<String>,
}

impl InstancePool {
    /// Build a pool, normalizing trailing slashes and dropping blanks.
    pub fn new(metadata: Vec<String>, streaming: Vec<String>) -> Self {
        fn clean(urls: Vec<String>) -> Vec<String> {
            urls.into_iter()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .collect()
        }
        Self {
            metadata: clean(metadata),
            streaming: clean(streaming),
        }
    }

    /// Base URLs for a request class.
    pub fn for_class(&self, class: RequestClass) -> &[String] {
        match class {
            RequestClass::Metadata => &self.metadata,
            RequestClass::Streaming => &self.streaming,
        }
    }
}

/// Delays applied between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Wait after a 429
    pub rate_limit_delay: Duration,
    /// Wait after a network-level failure
    pub network_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_delay: Duration::from_millis(500),
            network_delay: Duration::from_millis(200),
        }
    }
}

/// Failover errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailoverError {
    /// The caller cancelled the request
    #[error("request aborted")]
    Aborted,

    /// No instances configured for the class
    #[error("no instances configured for {0} requests")]
    EmptyPool(RequestClass),

    /// Last HTTP failure seen before giving up
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String, body: String },

    /// Every attempt failed below the HTTP layer
    #[error("all instances failed")]
    AllInstancesFailed,

    /// A 2xx body could not be decoded
    #[error("failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FailoverError {
    /// Whether this error is a cancellation rather than a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, FailoverError::Aborted)
    }

    /// HTTP status of the final failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FailoverError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of one attempt, used to drive the loop.
enum Attempt {
    Done(HttpResponse),
    RateLimited(FailoverError),
    Rotate(FailoverError),
    Network,
}

/// Resolves requests across a pool of backend instances.
#[derive(Clone)]
pub struct FailoverClient {
    transport: Arc<dyn Transport>,
    pool: Arc<InstancePool>,
    policy: RetryPolicy,
}

impl FailoverClient {
    /// Create a client over a transport and an instance pool.
    pub fn new(transport: Arc<dyn Transport>, pool: InstancePool) -> Self {
        Self {
            transport,
            pool: Arc::new(pool),
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry delays.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The configured pool.
    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    /// GET `path` against the pool for `class`.
    ///
    /// Returns the first 2xx response. `cancel` aborts the in-flight
    /// attempt and any pending delay.
    pub async fn get(
        &self,
        path: &str,
        class: RequestClass,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FailoverError> {
        self.fetch(path, class, cancel).await.map(|(_, response)| response)
    }

    /// Like [`get`](Self::get), also returning the URL that answered.
    async fn fetch(
        &self,
        path: &str,
        class: RequestClass,
        cancel: &CancellationToken,
    ) -> Result<(String, HttpResponse), FailoverError> {
        let instances = self.pool.for_class(class);
        if instances.is_empty() {
            return Err(FailoverError::EmptyPool(class));
        }

        let size = instances.len();
        let max_attempts = size * 2;
        let mut index = rand::rng().random_range(0..size);
        let mut last_error: Option<FailoverError> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(FailoverError::Aborted);
            }

            let url = join_url(&instances[index % size], path);
            debug!(target: "failover", %class, attempt, %url, "Attempting request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FailoverError::Aborted),
                result = self.transport.get(&url) => classify(result, &url),
            };

            match outcome {
                Attempt::Done(response) => return Ok((url, response)),
                Attempt::RateLimited(err) => {
                    warn!(target: "failover", %url, "Rate limited, rotating instance");
                    last_error = Some(err);
                    self.pause(self.policy.rate_limit_delay, cancel).await?;
                }
                Attempt::Rotate(err) => {
                    warn!(target: "failover", %url, error = %err, "Instance failed, rotating");
                    last_error = Some(err);
                }
                Attempt::Network => {
                    warn!(target: "failover", %url, "Network failure, rotating instance");
                    self.pause(self.policy.network_delay, cancel).await?;
                }
            }

            index = (index + 1) % size;
        }

        Err(last_error.unwrap_or(FailoverError::AllInstancesFailed))
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        class: RequestClass,
        cancel: &CancellationToken,
    ) -> Result<T, FailoverError> {
        let (url, response) = self.fetch(path, class, cancel).await?;
        serde_json::from_str(&response.body).map_err(|e| FailoverError::Parse {
            url,
            message: e.to_string(),
        })
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), FailoverError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailoverError::Aborted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn classify(result: Result<HttpResponse, TransportError>, url: &str) -> Attempt {
    let response = match result {
        Ok(r) => r,
        Err(e) => {
            debug!(target: "failover", %url, error = %e, "Transport error");
            return Attempt::Network;
        }
    };

    if response.is_success() {
        return Attempt::Done(response);
    }

    let status = response.status;
    let err = FailoverError::Http {
        status,
        url: url.to_string(),
        body: response.body.clone(),
    };

    match status {
        429 => Attempt::RateLimited(err),
        401 if has_auth_sub_status(&response.body) => {
            debug!(target: "failover", %url, "Instance auth rejected");
            Attempt::Rotate(err)
        }
        _ => Attempt::Rotate(err),
    }
}

/// Whether a 401 body carries the instance-auth sub-status.
fn has_auth_sub_status(body: &str) -> bool {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ErrorBody {
        sub_status: Option<i64>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.sub_status)
        .is_some_and(|s| s == AUTH_SUB_STATUS)
}

/// Join a base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
