//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Security-focused validation to prevent SSRF attacks
//! - **Text processing**: HTML entity decoding and control-character stripping
//! - **Retry**: A fixed-delay retry policy and the helper that applies it
//!
//! # Examples
//!
//! ```
//! use tidings::util::{clean_text, normalize_input, validate_url};
//!
//! // Validate a feed URL
//! let url = validate_url(&normalize_input("example.com/feed.xml")).unwrap();
//! assert_eq!(url.as_str(), "https://example.com/feed.xml");
//!
//! // Normalise feed text before it is stored
//! assert_eq!(clean_text(" Fish &amp; Chips "), "Fish & Chips");
//! ```

mod retry;
mod text;
mod url_validator;

pub use retry::{retry, RetryPolicy};
pub use text::{clean_text, decode_entities, strip_control_chars};
pub use url_validator::{
    normalize_input, validate_url, validate_url_with, UrlPolicy, UrlValidationError,
};
