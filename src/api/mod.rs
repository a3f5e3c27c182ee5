//! Remote article source.
//!
//! [`ArticleSource`] is the seam between the controllers and the network.
//! Controllers only ever see raw JSON records; turning them into articles is
//! the mapper's job (see [`crate::article`]). [`GraphqlClient`] is the
//! production implementation talking to the Veritas GraphQL endpoint.
//!
//! Every call takes a [`FetchToken`]. An implementation should give up with
//! [`ApiError::Cancelled`] as soon as it notices the token went stale; the
//! controllers re-check the token themselves before applying a result, so
//! honouring it is an optimisation, not a correctness requirement.

mod graphql;
mod queries;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::cancel::FetchToken;

pub use graphql::GraphqlClient;

/// Raw records exactly as the API returned them (entries may be `null`).
pub type RawRecords = Vec<Value>;

/// Errors from the remote article source.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// A single attempt exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The GraphQL layer reported errors and returned no usable data
    #[error("GraphQL error: {0}")]
    Graphql(String),
    /// The response body was not the JSON shape we asked for
    #[error("Invalid response: {0}")]
    Decode(String),
    /// The configured endpoint is not a usable http(s) URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The operation was superseded before it finished
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Returns true if this error is transient and the request may be retried.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Network(_) | ApiError::IncompleteResponse { .. } => true,
            ApiError::HttpStatus(status) => *status >= 500,
            ApiError::RateLimited(_)
            | ApiError::ResponseTooLarge
            | ApiError::Graphql(_)
            | ApiError::Decode(_)
            | ApiError::InvalidEndpoint(_)
            | ApiError::Cancelled => false,
        }
    }
}

/// The four queries the client needs from the backend.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Newest `limit` articles.
    async fn fetch_recent(&self, limit: usize, token: &FetchToken) -> Result<RawRecords, ApiError>;

    /// Articles `[start, stop)` of the recency-ordered feed.
    async fn fetch_range(
        &self,
        start: usize,
        stop: usize,
        token: &FetchToken,
    ) -> Result<RawRecords, ApiError>;

    /// Trending keywords, each with its associated articles embedded.
    async fn fetch_keywords(&self, token: &FetchToken) -> Result<RawRecords, ApiError>;

    /// Articles by id, in whatever order the server returns them.
    async fn fetch_by_ids(&self, ids: &[String], token: &FetchToken)
        -> Result<RawRecords, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::HttpStatus(503).is_retryable());
        assert!(ApiError::IncompleteResponse {
            expected: 10,
            received: 5
        }
        .is_retryable());
        assert!(!ApiError::HttpStatus(404).is_retryable());
        assert!(!ApiError::Graphql("boom".into()).is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn test_only_cancelled_is_cancelled() {
        assert!(ApiError::Cancelled.is_cancelled());
        assert!(!ApiError::Timeout.is_cancelled());
    }
}
