use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::ContentSource;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The cache database is locked by another process. Stop it and try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock failures to [`DatabaseError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Locked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// messages rather than typed codes through sqlx.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// An article as cached and served to the front end.
///
/// The wire format is camelCase JSON, matching what the browser client reads.
/// `content` is only present on per-article records (`article:<id>`), never in
/// the list, and only when the feed itself carried full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Stable id derived from the article link
    pub id: String,
    pub title: String,
    /// Absolute article link
    pub url: String,
    /// Plain-text excerpt shown in list views
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Display name of the feed the article came from
    pub source: String,
    /// Feed the article was read from, used to re-locate its entry later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    pub publication_datetime: DateTime<Utc>,
}

impl Article {
    /// Copy of the article without feed content, as stored in the list.
    pub fn without_content(&self) -> Self {
        Self {
            content: None,
            ..self.clone()
        }
    }
}

/// The `articlesList` record: every article from the last refresh, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleList {
    pub articles: Vec<Article>,
}

/// Extracted article content with TTL metadata
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub article_id: String,
    /// Sanitized HTML
    pub html: String,
    /// Pipeline step that produced the content
    pub source: ContentSource,
    pub fetched_at: String,
    pub expires_at: String,
    pub size_bytes: i64,
}

/// Aggregate cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Live (unexpired) KV records
    pub kv_entries: i64,
    /// Content cache rows, expired or not
    pub content_entries: i64,
    pub content_size_bytes: i64,
    pub oldest_content: Option<String>,
    pub newest_content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Article {
        Article {
            id: "abc".to_string(),
            title: "Title".to_string(),
            url: "https://example.com/a".to_string(),
            snippet: "Snippet".to_string(),
            content: Some("<p>Body</p>".to_string()),
            source: "Example".to_string(),
            feed_url: Some("https://example.com/feed".to_string()),
            publication_datetime: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_article_wire_format_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["publicationDatetime"], "2024-01-02T03:04:05Z");
        assert_eq!(json["feedUrl"], "https://example.com/feed");
        assert_eq!(json["content"], "<p>Body</p>");
    }

    #[test]
    fn test_without_content_omits_field() {
        let json = serde_json::to_value(sample().without_content()).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["title"], "Title");
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("(code: 14) unable to open database file"));
        assert!(!is_lock_message("no such table: kv"));
    }
}
