//! feedwell: an RSS/Atom aggregator with on-demand full article extraction.
//!
//! Articles from the configured sources are cached in SQLite and served over
//! a small JSON API. Full content for an article is produced on request by
//! the [`content`] pipeline and cached separately.

pub mod api;
pub mod config;
pub mod content;
pub mod feed;
pub mod http;
pub mod refresh;
pub mod storage;
pub mod util;
