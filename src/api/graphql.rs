use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::queries::{
    Operation, BATCH_FIND_ARTICLES, KEYWORDS, NEXT_RECENT_ARTICLES, RECENT_ARTICLES,
};
use super::{ApiError, ArticleSource, RawRecords};
use crate::cancel::FetchToken;

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

/// [`ArticleSource`] backed by the Veritas GraphQL endpoint.
///
/// One POST per query. Each attempt is bounded by `timeout`; HTTP 429, 5xx,
/// timeouts, and truncated bodies are retried with exponential backoff
/// (`retry_base`, doubled per retry, at most 3 retries).
pub struct GraphqlClient {
    client: reqwest::Client,
    endpoint: Url,
    api_token: Option<SecretString>,
    timeout: Duration,
    retry_base: Duration,
}

/// Keep the bearer token out of logs.
impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("retry_base", &self.retry_base)
            .finish()
    }
}

impl GraphqlClient {
    /// Build a client for `endpoint` (must be http or https).
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ApiError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("veritas/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_token: None,
            timeout,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_api_token(mut self, token: SecretString) -> Self {
        if self.endpoint.scheme() != "https" && !is_loopback(&self.endpoint) {
            tracing::warn!(
                endpoint = %self.endpoint,
                "Sending API token over plain HTTP to a non-local endpoint"
            );
        }
        self.api_token = Some(token);
        self
    }

    /// Override the first backoff delay (later retries double it).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    async fn execute(
        &self,
        op: Operation,
        variables: Value,
        token: &FetchToken,
    ) -> Result<RawRecords, ApiError> {
        let body = serde_json::to_vec(&json!({
            "operationName": op.name,
            "query": op.document,
            "variables": variables,
        }))
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        let bytes = self.post_with_retry(op, &body, token).await?;

        // The response may have arrived after the caller moved on.
        if token.is_cancelled() {
            tracing::debug!(operation = op.name, "Dropping response for cancelled request");
            return Err(ApiError::Cancelled);
        }

        let records = extract_list(op, &bytes)?;
        tracing::debug!(
            operation = op.name,
            records = records.len(),
            "GraphQL query completed"
        );
        Ok(records)
    }

    async fn post_with_retry(
        &self,
        op: Operation,
        body: &[u8],
        token: &FetchToken,
    ) -> Result<Vec<u8>, ApiError> {
        let mut retry_count = 0;

        loop {
            if token.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            match self.post_once(body).await {
                Ok(bytes) => return Ok(bytes),
                Err(ApiError::HttpStatus(429)) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(ApiError::RateLimited(MAX_RETRIES));
                    }
                    tracing::warn!(
                        operation = op.name,
                        retry = retry_count,
                        "Rate limited, backing off"
                    );
                }
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    tracing::debug!(
                        operation = op.name,
                        error = %e,
                        retry = retry_count + 1,
                        "Retrying GraphQL request after transient error"
                    );
                }
                Err(e) => return Err(e),
            }

            let delay = self.retry_base.saturating_mul(1u32 << retry_count);
            tokio::time::sleep(delay).await;
            retry_count += 1;
        }
    }

    /// One attempt, headers and body both within `timeout`.
    async fn post_once(&self, body: &[u8]) -> Result<Vec<u8>, ApiError> {
        tokio::time::timeout(self.timeout, self.send_and_read(body))
            .await
            .map_err(|_| ApiError::Timeout)?
    }

    async fn send_and_read(&self, body: &[u8]) -> Result<Vec<u8>, ApiError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(api_token) = &self.api_token {
            request = request.bearer_auth(api_token.expose_secret());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

#[async_trait]
impl ArticleSource for GraphqlClient {
    async fn fetch_recent(&self, limit: usize, token: &FetchToken) -> Result<RawRecords, ApiError> {
        self.execute(RECENT_ARTICLES, json!({ "amount": limit }), token)
            .await
    }

    async fn fetch_range(
        &self,
        start: usize,
        stop: usize,
        token: &FetchToken,
    ) -> Result<RawRecords, ApiError> {
        self.execute(
            NEXT_RECENT_ARTICLES,
            json!({ "start": start, "stop": stop }),
            token,
        )
        .await
    }

    async fn fetch_keywords(&self, token: &FetchToken) -> Result<RawRecords, ApiError> {
        self.execute(KEYWORDS, json!({}), token).await
    }

    async fn fetch_by_ids(
        &self,
        ids: &[String],
        token: &FetchToken,
    ) -> Result<RawRecords, ApiError> {
        self.execute(BATCH_FIND_ARTICLES, json!({ "ids": ids }), token)
            .await
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ApiError> {
    let url =
        Url::parse(endpoint).map_err(|e| ApiError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(ApiError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme '{scheme}' or missing host"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

/// Pull the list under `op.field` out of a GraphQL response body.
///
/// Partial responses (data plus errors) keep the data and log the errors.
fn extract_list(op: Operation, bytes: &[u8]) -> Result<RawRecords, ApiError> {
    let response: GraphqlResponse =
        serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))?;

    let messages = response
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let list = response
        .data
        .and_then(|mut data| data.get_mut(op.field).map(Value::take))
        .filter(|v| !v.is_null());

    match list {
        Some(Value::Array(records)) => {
            if !messages.is_empty() {
                tracing::warn!(
                    operation = op.name,
                    errors = %messages,
                    "GraphQL returned partial data with errors"
                );
            }
            Ok(records)
        }
        Some(_) => Err(ApiError::Decode(format!(
            "field '{}' is not a list",
            op.field
        ))),
        None if !messages.is_empty() => Err(ApiError::Graphql(messages)),
        None => Err(ApiError::Decode(format!(
            "response has no '{}' field",
            op.field
        ))),
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ApiError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
