use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

use crate::content::{html_to_text, sanitize_html};
use crate::storage::Article;
use crate::util::{collapse_whitespace, normalize_url, strip_control_chars, truncate_chars, validate_http_url};

/// Maximum snippet length in characters (before the ellipsis)
pub const SNIPPET_MAX_CHARS: usize = 280;

/// Result of parsing a feed with entry validation.
#[derive(Debug)]
pub struct ParseResult {
    /// Usable articles, in feed order
    pub articles: Vec<Article>,
    /// Entries dropped for missing link, title, text or date
    pub skipped: usize,
}

/// Parse an RSS 0.9x/1.0/2.0, Atom or JSON Feed document into articles.
///
/// Entries are kept only if they have a link, a title, some text (summary or
/// content) and a publication date (`published`, else `updated`). Relative
/// links are resolved against `feed_url`. Full entry content, when present,
/// is sanitized and kept on the article for its `article:<id>` record.
///
/// # Errors
///
/// Fails when the document is not a recognizable feed.
pub fn parse_feed(bytes: &[u8], source_name: &str, feed_url: &str) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;
    let base = Url::parse(feed_url).ok();

    let mut articles = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in feed.entries {
        let Some(url) = entry_link(&entry.links, base.as_ref()) else {
            tracing::debug!(source = %source_name, entry_id = %entry.id, "Skipping entry without usable link");
            skipped += 1;
            continue;
        };

        let title = entry
            .title
            .map(|t| clean_text(&t.content))
            .unwrap_or_default();
        if title.is_empty() {
            tracing::debug!(source = %source_name, url = %url, "Skipping entry without title");
            skipped += 1;
            continue;
        }

        let Some(published) = entry.published.or(entry.updated) else {
            tracing::debug!(source = %source_name, url = %url, "Skipping entry without date");
            skipped += 1;
            continue;
        };

        let content_html = entry
            .content
            .and_then(|c| c.body)
            .filter(|body| !body.trim().is_empty());
        let summary_text = entry
            .summary
            .map(|s| clean_text(&s.content))
            .filter(|s| !s.is_empty());

        let snippet_source = summary_text.or_else(|| content_html.as_deref().map(clean_text));
        let Some(snippet) = snippet_source.filter(|s| !s.is_empty()) else {
            tracing::debug!(source = %source_name, url = %url, "Skipping entry without text");
            skipped += 1;
            continue;
        };

        let content = content_html
            .map(|html| sanitize_html(&html, &url))
            .filter(|html| !html.is_empty());

        articles.push(Article {
            id: article_id(&url),
            title,
            snippet: truncate_chars(&snippet, SNIPPET_MAX_CHARS).into_owned(),
            content,
            source: source_name.to_string(),
            feed_url: Some(feed_url.to_string()),
            publication_datetime: published,
            url,
        });
    }

    Ok(ParseResult { articles, skipped })
}

/// Stable article id: hex of the first 16 bytes of SHA-256 over the
/// normalized article link.
///
/// Cosmetic link variants (tracking params, `www.`, trailing slash) map to
/// the same id, and the id is safe to embed in URL paths and KV keys.
pub fn article_id(url: &str) -> String {
    let hash = Sha256::digest(normalize_url(url).as_bytes());
    hash[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Pick the entry's article link: the `alternate` link if marked, else the
/// first link. Relative links resolve against the feed URL; only http(s)
/// results are accepted.
fn entry_link(links: &[feed_rs::model::Link], base: Option<&Url>) -> Option<String> {
    let link = links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.first())?;

    let href = link.href.trim();
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    validate_http_url(resolved.as_str()).ok().map(String::from)
}

/// Plain text of a title or summary: tags stripped, entities decoded,
/// control characters removed, whitespace collapsed.
fn clean_text(raw: &str) -> String {
    let text = if raw.contains('<') {
        html_to_text(raw)
    } else {
        html_escape::decode_html_entities(raw).into_owned()
    };
    collapse_whitespace(&strip_control_chars(&text))
}
