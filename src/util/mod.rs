//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Security-focused validation to prevent SSRF attacks
//! - **URL normalization**: Canonical forms used to match article links across feeds
//! - **Text processing**: Snippet shaping (whitespace, truncation, control characters)
//!
//! # Examples
//!
//! ```
//! use feedwell::util::{validate_url, normalize_url, truncate_chars};
//!
//! // Validate a page URL before fetching it
//! let url = validate_url("https://example.com/post").unwrap();
//!
//! // Links that differ only in fragment or trailing slash compare equal
//! assert_eq!(
//!     normalize_url("https://Example.com/post/#top"),
//!     normalize_url("http://example.com/post"),
//! );
//!
//! // Shorten a snippet
//! let short = truncate_chars("Long article summary", 10);
//! ```

mod text;
mod url_normalize;
mod url_validator;

pub use text::{collapse_whitespace, strip_control_chars, truncate_chars};
pub use url_normalize::normalize_url;
pub use url_validator::{is_public_ip, validate_http_url, validate_url, UrlValidationError};
