use crate::util::{validate_http_url, validate_url, UrlValidationError};
use futures::StreamExt;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 3;

static LAST_REQUEST_MS: AtomicU64 = AtomicU64::new(0);
const MIN_REQUEST_INTERVAL_MS: u64 = 100; // 10 requests/sec max
const MAX_COLLISIONS: u64 = 20; // Safety valve for rate limiter collision loop
const RATE_LIMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Feeds kept in memory for entry lookups
const FEED_CACHE_CAPACITY: usize = 64;
const FEED_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

// Monotonic clock so NTP corrections or VM resume never stall the limiter.
static START_INSTANT: OnceLock<Instant> = OnceLock::new();

fn monotonic_ms() -> u64 {
    let start = START_INSTANT.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out after 20s")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Refusing to fetch URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl ContentError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            ContentError::Timeout => true,
            // Redirect policy rejections surface as reqwest errors too; those never heal.
            ContentError::Network(e) => !e.is_redirect() && !e.is_builder(),
            ContentError::HttpStatus(status) => *status >= 500,
            ContentError::ResponseTooLarge(_)
            | ContentError::InvalidUrl(_)
            | ContentError::UnsupportedContentType(_) => false,
        }
    }
}

/// A fetched web page, decoded to text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative links in the page resolve against it
    pub url: Url,
    pub html: String,
}

struct CachedFeed {
    bytes: Arc<[u8]>,
    fetched_at: Instant,
}

/// Fetches article pages and feeds for content extraction.
///
/// Cheap to clone; clones share the feed cache.
#[derive(Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    allow_private_hosts: bool,
    feed_cache: Arc<Mutex<LruCache<String, CachedFeed>>>,
}

impl ContentFetcher {
    pub fn new(client: reqwest::Client, allow_private_hosts: bool) -> Self {
        let capacity = NonZeroUsize::new(FEED_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            allow_private_hosts,
            feed_cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Validate a user- or feed-supplied URL against the fetch policy.
    ///
    /// With `allow_private_hosts` only the scheme is checked; otherwise
    /// localhost and private address ranges are rejected (SSRF).
    pub fn check_url(&self, url: &str) -> Result<Url, ContentError> {
        let parsed = if self.allow_private_hosts {
            validate_http_url(url)?
        } else {
            validate_url(url)?
        };
        Ok(parsed)
    }

    /// Fetch an article page.
    ///
    /// Only HTML-ish responses are accepted (a missing content type is given
    /// the benefit of the doubt). The body is decoded as UTF-8, lossily.
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, ContentError> {
        let parsed = self.check_url(url)?;

        let (final_url, bytes) = self
            .get_with_retry(parsed, MAX_PAGE_SIZE, true)
            .await?;

        Ok(FetchedPage {
            url: final_url,
            html: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Fetch a feed document, served from the in-memory cache when a copy
    /// younger than ten minutes exists.
    pub async fn fetch_feed(&self, url: &str) -> Result<Arc<[u8]>, ContentError> {
        let parsed = self.check_url(url)?;
        let key = parsed.as_str().to_string();

        {
            let mut cache = self.feed_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < FEED_CACHE_TTL {
                    tracing::debug!(feed = %key, "Feed cache hit");
                    return Ok(Arc::clone(&entry.bytes));
                }
                cache.pop(&key);
            }
        }

        let (_, bytes) = self.get_with_retry(parsed, MAX_FEED_SIZE, false).await?;
        let bytes: Arc<[u8]> = Arc::from(bytes);

        self.feed_cache.lock().await.put(
            key,
            CachedFeed {
                bytes: Arc::clone(&bytes),
                fetched_at: Instant::now(),
            },
        );

        Ok(bytes)
    }

    /// GET with retry logic for transient failures.
    /// Uses exponential backoff: 1s, 2s, 4s (max 3 retries).
    async fn get_with_retry(
        &self,
        url: Url,
        limit: usize,
        require_html: bool,
    ) -> Result<(Url, Vec<u8>), ContentError> {
        let mut retry_count = 0;

        loop {
            match self.get_once(&url, limit, require_html).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = 1u64 << retry_count; // 1s, 2s, 4s
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying fetch after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(
        &self,
        url: &Url,
        limit: usize,
        require_html: bool,
    ) -> Result<(Url, Vec<u8>), ContentError> {
        wait_for_rate_limit().await;

        let request = self
            .client
            .get(url.clone())
            .header(
                reqwest::header::ACCEPT,
                if require_html {
                    "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5"
                } else {
                    "application/rss+xml,application/atom+xml,application/xml;q=0.9,*/*;q=0.5"
                },
            );

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| ContentError::Timeout)?
            .map_err(ContentError::Network)?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status().as_u16()));
        }

        if require_html {
            if let Some(content_type) = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
            {
                if !is_html_content_type(content_type) {
                    return Err(ContentError::UnsupportedContentType(content_type.to_string()));
                }
            }
        }

        let final_url = response.url().clone();
        let bytes = tokio::time::timeout(REQUEST_TIMEOUT, read_limited_bytes(response, limit))
            .await
            .map_err(|_| ContentError::Timeout)??;

        Ok((final_url, bytes))
    }
}

/// Claim the next request slot, spacing requests at least 100ms apart
/// across the whole process.
///
/// Uses compare_exchange to claim a slot atomically. Gives up waiting after a
/// 5s budget or 20 lost races and proceeds anyway.
async fn wait_for_rate_limit() {
    let mut collision_count: u64 = 0;
    let rate_limit_start = Instant::now();

    loop {
        if rate_limit_start.elapsed() > RATE_LIMIT_TIMEOUT {
            tracing::debug!(
                elapsed_ms = rate_limit_start.elapsed().as_millis(),
                collisions = collision_count,
                "Rate limiter timeout budget exceeded, proceeding"
            );
            return;
        }

        let now = monotonic_ms();
        let last = LAST_REQUEST_MS.load(Ordering::Acquire);
        let next_allowed = last.saturating_add(MIN_REQUEST_INTERVAL_MS);

        if now >= next_allowed {
            match LAST_REQUEST_MS.compare_exchange(last, now, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(_) => {
                    collision_count += 1;
                    if collision_count >= MAX_COLLISIONS {
                        tracing::warn!(
                            collisions = collision_count,
                            "Rate limiter max collisions reached, proceeding without slot"
                        );
                        return;
                    }
                    if collision_count > 1 {
                        // 100us, 200us, 400us... capped at 6.4ms
                        let backoff_us = 100 * (1u64 << collision_count.min(6));
                        tokio::time::sleep(Duration::from_micros(backoff_us)).await;
                    }
                }
            }
        } else {
            // At least 1ms so clock drift cannot turn this into a spin
            let wait_ms = next_allowed.saturating_sub(now).max(1);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }
}

/// HTML, XHTML, and plain text (some servers label static HTML as text/plain).
fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    matches!(
        mime.as_str(),
        "" | "text/html" | "application/xhtml+xml" | "text/plain" | "application/xml" | "text/xml"
    )
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ContentError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
