//! Shared HTTP plumbing for the REST backends

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::{Result, RetrievalError};

/// Decode a success body or map the status to an error
pub async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        return response.json().await.map_err(RetrievalError::Http);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RetrievalError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => RetrievalError::RateLimit,
        _ if status.is_server_error() => RetrievalError::Server(body),
        _ => RetrievalError::Api {
            status: status.as_u16(),
            message: body,
        },
    })
}

/// Default first backoff step
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Exponential backoff: `base` doubling per attempt, capped at 2^5
pub fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << attempt.min(5))
}
