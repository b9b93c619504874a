//! Article content extraction.
//!
//! Given an article URL (and, when known, the feed it came from), the
//! pipeline tries in order:
//!
//! 1. the matching feed entry, when it carries enough text to be the article
//! 2. the live page, with the main body isolated from navigation and boilerplate
//! 3. a shorter feed entry found in step 1
//! 4. the snippet
//!
//! Every HTML result is sanitized, with relative links and images rewritten
//! to absolute URLs. Failures along the way are logged and the next step is
//! tried; extraction itself never fails.

mod entry;
mod fetch;
mod readability;
mod sanitize;

use serde::{Deserialize, Serialize};

pub use entry::{find_entry_content, EntryContent};
pub use fetch::{ContentError, ContentFetcher, FetchedPage};
pub use readability::{extract_article, extract_main_content, PageContent, MIN_CONTENT_CHARS};
pub use sanitize::{html_to_text, sanitize_html};

/// Pipeline step that produced a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Feed,
    Page,
    Snippet,
}

impl ContentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentSource::Feed => "feed",
            ContentSource::Page => "page",
            ContentSource::Snippet => "snippet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(ContentSource::Feed),
            "page" => Some(ContentSource::Page),
            "snippet" => Some(ContentSource::Snippet),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Sanitized HTML, safe to insert into the page
    pub html: String,
    pub source: ContentSource,
    /// Entry or page title, when one was seen
    pub title: Option<String>,
    /// Last failure before falling back to the snippet
    pub error: Option<String>,
}

/// Runs the extraction steps against the network.
#[derive(Clone)]
pub struct ContentPipeline {
    fetcher: ContentFetcher,
}

impl ContentPipeline {
    pub fn new(fetcher: ContentFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    /// Extract the full content of an article.
    ///
    /// # Arguments
    ///
    /// * `article_url` - Link of the article; base for relative references in feed content
    /// * `feed_url` - Feed the article came from, if known
    /// * `snippet` - Plain-text fallback
    pub async fn extract(
        &self,
        article_url: &str,
        feed_url: Option<&str>,
        snippet: &str,
    ) -> ExtractedContent {
        let mut errors: Vec<String> = Vec::new();
        let mut short_entry: Option<(String, Option<String>)> = None;

        // Step 1: feed entry
        if let Some(feed_url) = feed_url {
            match self.entry_content(article_url, feed_url).await {
                Ok(Some(entry)) => {
                    let html = sanitize_html(&entry.html, article_url);
                    let text_len = html_to_text(&html).chars().count();
                    if text_len >= MIN_CONTENT_CHARS {
                        tracing::debug!(url = %article_url, text_len, "Using feed entry content");
                        return ExtractedContent {
                            html,
                            source: ContentSource::Feed,
                            title: entry.title,
                            error: None,
                        };
                    }
                    if text_len > 0 {
                        short_entry = Some((html, entry.title));
                    }
                }
                Ok(None) => {
                    tracing::debug!(url = %article_url, feed = %feed_url, "No matching feed entry");
                }
                Err(e) => {
                    tracing::warn!(url = %article_url, feed = %feed_url, error = %e, "Feed lookup failed");
                    errors.push(format!("Feed lookup failed: {e}"));
                }
            }
        }

        // Step 2: live page
        match self.page_content(article_url).await {
            Ok((html, title)) if !html.is_empty() => {
                return ExtractedContent {
                    html,
                    source: ContentSource::Page,
                    title,
                    error: None,
                };
            }
            Ok(_) => {
                errors.push("No article content found on page".to_string());
            }
            Err(e) => {
                tracing::warn!(url = %article_url, error = %e, "Page fetch failed");
                errors.push(format!("Page fetch failed: {e}"));
            }
        }

        // Step 3: whatever the feed had
        if let Some((html, title)) = short_entry {
            return ExtractedContent {
                html,
                source: ContentSource::Feed,
                title,
                error: None,
            };
        }

        // Step 4: snippet
        tracing::debug!(url = %article_url, "Falling back to snippet");
        ExtractedContent {
            html: snippet_html(snippet),
            source: ContentSource::Snippet,
            title: None,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    async fn entry_content(
        &self,
        article_url: &str,
        feed_url: &str,
    ) -> Result<Option<EntryContent>, ContentError> {
        let bytes = self.fetcher.fetch_feed(feed_url).await?;
        let article_url = article_url.to_string();
        // Feed parsing is CPU-bound; keep it off the async workers
        let entry = tokio::task::spawn_blocking(move || find_entry_content(&bytes, &article_url))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Feed entry lookup task failed");
                None
            });
        Ok(entry)
    }

    /// Fetch the page and return (sanitized body, page title).
    async fn page_content(&self, article_url: &str) -> Result<(String, Option<String>), ContentError> {
        let page = self.fetcher.fetch_page(article_url).await?;
        let (html, title) = tokio::task::spawn_blocking(move || {
            let PageContent { title, body } = extract_article(&page.html);
            let html = body
                .map(|body| sanitize_html(&body, page.url.as_str()))
                .unwrap_or_default();
            (html, title)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Page extraction task failed");
            (String::new(), None)
        });
        Ok((html, title))
    }
}

/// The snippet as a single escaped paragraph.
pub fn snippet_html(snippet: &str) -> String {
    let snippet = snippet.trim();
    if snippet.is_empty() {
        return String::new();
    }
    format!("<p>{}</p>", html_escape::encode_text(snippet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_source_round_trip() {
        for source in [ContentSource::Feed, ContentSource::Page, ContentSource::Snippet] {
            assert_eq!(ContentSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(ContentSource::parse("other"), None);
    }

    #[test]
    fn test_content_source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ContentSource::Snippet).unwrap(),
            "\"snippet\""
        );
    }

    #[test]
    fn test_snippet_html_escaped() {
        assert_eq!(snippet_html("  a < b & c "), "<p>a &lt; b &amp; c</p>");
        assert_eq!(snippet_html("   "), "");
    }

    #[tokio::test]
    async fn test_unreachable_article_falls_back_to_snippet() {
        // Private hosts are refused by default, so no request leaves the process.
        let pipeline = ContentPipeline::new(ContentFetcher::new(reqwest::Client::new(), false));
        let extracted = pipeline
            .extract("http://127.0.0.1/post", Some("http://127.0.0.1/feed"), "The snippet")
            .await;

        assert_eq!(extracted.source, ContentSource::Snippet);
        assert_eq!(extracted.html, "<p>The snippet</p>");
        assert!(extracted.error.unwrap().starts_with("Page fetch failed"));
    }
}
