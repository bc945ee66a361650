use thiserror::Error;
use url::Url;

use super::http::{FetchError, HttpFetcher};
use super::parser::{parse, ParsedFeed};
use super::sync::SyncError;
use crate::util::normalize_input;

/// Conventional feed locations tried when neither the input nor its HTML
/// links lead to a feed.
const WELL_KNOWN_PATHS: &[&str] = &["/feed", "/rss", "/feed.xml", "/rss.xml", "/atom.xml"];

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The input could not be turned into a working feed URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolves user input to a working feed URL.
#[derive(Debug, Clone)]
pub struct FeedLocator {
    fetcher: HttpFetcher,
}

impl FeedLocator {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    /// Find the feed URL behind a URL or bare hostname.
    ///
    /// Tries, in order: the input itself as a feed, feed `<link>` tags in the
    /// input's HTML, then the conventional paths on the input's host. The
    /// first candidate that both fetches and parses wins.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidUrl`] when the input is not a valid
    /// http(s) URL under the fetch policy or no candidate works.
    pub async fn discover(&self, input: &str) -> Result<Url, DiscoveryError> {
        self.locate(input).await.map(|(url, _)| url)
    }

    /// [`discover`](Self::discover), also handing back the parsed feed so
    /// callers do not fetch it twice.
    pub async fn locate(&self, input: &str) -> Result<(Url, ParsedFeed), DiscoveryError> {
        let invalid = || DiscoveryError::InvalidUrl(input.trim().to_owned());
        let url = self
            .fetcher
            .validate(&normalize_input(input))
            .map_err(|_| invalid())?;

        // (a) the input is the feed
        let page = match self.fetcher.get(&url).await {
            Ok(body) => match parse(&body) {
                Ok(feed) => return Ok((url, feed)),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Input is not a feed, scanning HTML");
                    Some(body)
                }
            },
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Direct fetch failed");
                None
            }
        };

        // (b) feed links advertised by the page
        if let Some(body) = page {
            let html = String::from_utf8_lossy(&body);
            for candidate in find_feed_links_in_html(&html, &url) {
                if let Some(found) = self.try_candidate(candidate).await {
                    return Ok(found);
                }
            }
        }

        // (c) conventional locations on the same host
        for path in WELL_KNOWN_PATHS {
            let Ok(candidate) = url.join(path) else {
                continue;
            };
            if let Some(found) = self.try_candidate(candidate).await {
                return Ok(found);
            }
        }

        tracing::info!(input = %input.trim(), "No feed found");
        Err(invalid())
    }

    async fn try_candidate(&self, candidate: Url) -> Option<(Url, ParsedFeed)> {
        match self.fetch_feed(&candidate).await {
            Ok(feed) => Some((candidate, feed)),
            Err(e) => {
                tracing::debug!(url = %candidate, error = %e, "Candidate feed URL rejected");
                None
            }
        }
    }

    /// Fetch and parse one known feed URL.
    pub async fn fetch_feed(&self, url: &Url) -> Result<ParsedFeed, SyncError> {
        let body = self.fetcher.get(url).await?;
        let feed = parse(&body)?;
        if feed.skipped > 0 {
            tracing::warn!(feed = %url, filtered = feed.skipped, "Items without title or link skipped");
        }
        Ok(feed)
    }

    /// Liveness check: does `url` still answer with a body?
    pub async fn probe(&self, url: &Url) -> Result<(), FetchError> {
        self.fetcher.get(url).await.map(|_| ())
    }
}

/// Scans HTML for `<link>` tags with an RSS/Atom `type` attribute.
///
/// Uses simple string scanning (no HTML parser dependency). Handles attribute
/// ordering variations and both quote styles, and resolves relative URLs
/// against the page URL. Returns candidates in document order.
fn find_feed_links_in_html(html: &str, base_url: &Url) -> Vec<Url> {
    let html_lower = html.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        // Find the end of this <link> tag
        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };

        let tag = &remaining[..=tag_end];

        if is_feed_type(tag) {
            // Extract href from the original (non-lowered) HTML to preserve URL case
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(resolved) =
                extract_attr_value(original_tag, "href").and_then(|href| resolve_url(href, base_url))
            {
                if !found.contains(&resolved) {
                    found.push(resolved);
                }
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    found
}

/// Checks if a lowercased `<link>` tag has an RSS or Atom feed type.
fn is_feed_type(tag: &str) -> bool {
    matches!(
        extract_attr_value(tag, "type").map(str::trim),
        Some("application/rss+xml" | "application/atom+xml")
    )
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    // require a separator before the name so `data-href=` is not `href=`
    let attr_start = tag_lower.match_indices(&attr_prefix).find_map(|(pos, _)| {
        let before = tag_lower[..pos].chars().next_back();
        before.is_some_and(char::is_whitespace).then_some(pos)
    })?;
    let value_start = attr_start + attr_prefix.len();

    if value_start >= tag.len() {
        return None;
    }

    let rest = &tag[value_start..];
    let quote = rest.as_bytes().first()?;

    if *quote != b'"' && *quote != b'\'' {
        return None;
    }

    let quote_char = *quote as char;
    let inner = &rest[1..];
    let end = inner.find(quote_char)?;

    Some(&inner[..end])
}

/// Resolves a potentially relative (or protocol-relative) href against the
/// page URL. Only http(s) results are kept.
fn resolve_url(href: &str, base_url: &Url) -> Option<Url> {
    let resolved = base_url.join(href.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}
