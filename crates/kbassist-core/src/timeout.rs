//! Timeout handling
//!
//! Every network call (chat completion, embedding, vector search, upsert)
//! runs under a caller-supplied deadline. Hitting the deadline is reported
//! as a `TimeoutError` that callers treat exactly like a backend failure.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutError {
    /// Duration that was exceeded
    pub duration: Duration,
    /// Operation name
    pub operation: String,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation '{}' timed out after {:?}",
            self.operation, self.duration
        )
    }
}

impl std::error::Error for TimeoutError {}

/// Deadline applied to backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub request_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl TimeoutPolicy {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Run `operation` under the request timeout
    pub async fn execute<Fut, T>(&self, operation_name: &str, operation: Fut) -> Result<T, TimeoutError>
    where
        Fut: Future<Output = T>,
    {
        match tokio::time::timeout(self.request_timeout, operation).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(
                    operation = operation_name,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Operation timed out"
                );
                Err(TimeoutError {
                    duration: self.request_timeout,
                    operation: operation_name.to_string(),
                })
            }
        }
    }
}
