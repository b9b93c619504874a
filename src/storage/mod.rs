//! SQLite-backed cache standing in for the hosted key-value store.
//!
//! - [`kv`]: generic string records with optional TTL
//! - [`articles`]: the article list and per-article records, laid out as
//!   `articlesList`, `article:<id>`, `lastUpdated` and `error`
//! - [`content_cache`]: extracted article content with TTL

mod articles;
mod content_cache;
mod kv;
mod schema;
mod types;

pub use articles::{article_key, ARTICLES_LIST_KEY, ERROR_KEY, LAST_UPDATED_KEY};
pub use schema::Database;
pub use types::{Article, ArticleList, CacheStats, CachedContent, DatabaseError};
