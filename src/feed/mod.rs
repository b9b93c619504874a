//! Feed fetching and parsing.
//!
//! - [`parser`] - Feed parsing using the `feed-rs` crate (RSS 0.9x/1.0/2.0,
//!   Atom, JSON Feed) into cached [`Article`](crate::storage::Article)s
//! - [`fetcher`] - Concurrent HTTP retrieval of all configured sources with
//!   retry logic, producing a [`RefreshReport`]

mod fetcher;
mod parser;

pub use fetcher::{fetch_feed_bytes, refresh_all, FetchError, RefreshReport};
pub use parser::{article_id, parse_feed, ParseResult, SNIPPET_MAX_CHARS};
