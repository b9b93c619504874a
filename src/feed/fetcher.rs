use crate::config::SourceConfig;
use crate::feed::parser::{parse_feed, ParseResult};
use crate::storage::Article;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_FETCHES: usize = 10;

/// Errors that can occur while fetching and parsing one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Outcome of refreshing every configured source.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Articles from all sources that succeeded, newest first, unique by id
    pub articles: Vec<Article>,
    /// Failed sources in configuration order, with the reason
    pub failures: Vec<(String, FetchError)>,
    /// Entries dropped by the parser across all sources
    pub skipped: usize,
}

impl RefreshReport {
    /// Human-readable summary of failed sources, `None` when all succeeded.
    ///
    /// One `"Failed to fetch <name>."` sentence per failed source.
    pub fn error_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let message: String = self
            .failures
            .iter()
            .map(|(name, _)| format!("Failed to fetch {name}. "))
            .collect();
        Some(message.trim().to_string())
    }
}

/// Fetches and parses all sources concurrently.
///
/// # Behavior
///
/// - Fetches up to 10 feeds simultaneously
/// - Each request has a 30-second timeout
/// - HTTP 429, 5xx and truncated bodies trigger exponential backoff (2s, 4s, 8s)
///   with up to 3 retries
/// - Response bodies are limited to 10MB to prevent memory exhaustion
/// - A failing source never affects the others; it is reported in
///   [`RefreshReport::failures`]
pub async fn refresh_all(client: &reqwest::Client, sources: &[SourceConfig]) -> RefreshReport {
    let mut results: Vec<(usize, SourceConfig, Result<ParseResult, FetchError>)> =
        stream::iter(sources.iter().cloned().enumerate())
            .map(|(index, source)| {
                let client = client.clone();
                async move {
                    let result = fetch_one(&client, &source).await;
                    (index, source, result)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

    // Completion order is arbitrary; report failures in configuration order.
    results.sort_by_key(|(index, _, _)| *index);

    let mut report = RefreshReport::default();
    for (_, source, result) in results {
        match result {
            Ok(ParseResult { articles, skipped }) => {
                tracing::info!(
                    source = %source.name,
                    articles = articles.len(),
                    skipped,
                    "Fetched feed"
                );
                report.skipped += skipped;
                report.articles.extend(articles);
            }
            Err(e) => {
                tracing::error!(source = %source.name, url = %source.url, error = %e, "Failed to fetch feed");
                report.failures.push((source.name.clone(), e));
            }
        }
    }

    // Most recent first; the sort is stable so feed order breaks ties.
    report
        .articles
        .sort_by(|a, b| b.publication_datetime.cmp(&a.publication_datetime));

    let mut seen = HashSet::new();
    report.articles.retain(|a| seen.insert(a.id.clone()));

    report
}

async fn fetch_one(client: &reqwest::Client, source: &SourceConfig) -> Result<ParseResult, FetchError> {
    let bytes = fetch_feed_bytes(client, &source.url).await?;

    // Parsing is CPU-bound; keep large feeds off the async workers.
    let name = source.name.clone();
    let url = source.url.clone();
    tokio::task::spawn_blocking(move || parse_feed(&bytes, &name, &url))
        .await
        .map_err(|e| FetchError::Parse(e.to_string()))?
        .map_err(|e| FetchError::Parse(e.to_string()))
}

/// Download a feed body with retry, timeout and size limit.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Request exceeded 30 seconds
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response (5xx after retries)
/// - [`FetchError::RateLimited`] - 429 response after max retries
/// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
/// - [`FetchError::IncompleteResponse`] - Truncated body after retries
pub async fn fetch_feed_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut retry_count = 0;

    loop {
        let response = tokio::time::timeout(FETCH_TIMEOUT, client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        // Rate limiting: back off and retry
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if retry_count >= MAX_RETRIES {
                return Err(FetchError::RateLimited(MAX_RETRIES));
            }

            let delay_secs = 2u64 << retry_count; // 2s, 4s, 8s
            tracing::warn!(
                feed = %url,
                retry = retry_count,
                delay_secs = delay_secs,
                "Rate limited, backing off"
            );

            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            retry_count += 1;
            continue;
        }

        if response.status().is_server_error() {
            if retry_count >= MAX_RETRIES {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            let delay_secs = 2u64 << retry_count; // 2s, 4s, 8s
            tracing::warn!(
                feed = %url,
                status = %response.status(),
                retry = retry_count,
                delay_secs = delay_secs,
                "Server error, retrying after delay"
            );

            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            retry_count += 1;
            continue;
        }

        // 4xx errors fail immediately
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        match tokio::time::timeout(FETCH_TIMEOUT, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchError::Timeout)?
        {
            Ok(bytes) => return Ok(bytes),
            Err(FetchError::IncompleteResponse { expected, received }) => {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::IncompleteResponse { expected, received });
                }

                let delay_secs = 2u64 << retry_count;
                tracing::debug!(
                    feed = %url,
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    delay_secs = delay_secs,
                    "Retrying incomplete download"
                );

                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Network interruptions can end the stream early without an error.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
