//! Feed ingestion: parsing, discovery, synchronization, OPML and maintenance.
//!
//! - [`parse`] turns RSS/Atom bytes into a [`ParsedFeed`] (pure, no I/O)
//! - [`HttpFetcher`] is the single network primitive (timeout, size cap,
//!   host policy)
//! - [`FeedLocator`] resolves user input to a working feed URL
//! - [`FeedSyncCoordinator`] adds feeds and refreshes them in bounded batches
//! - [`OpmlInterchange`] imports and exports folder/feed hierarchies
//! - [`MaintenanceService`] merges duplicates and evicts unreachable feeds
//!
//! # Example
//!
//! ```ignore
//! use tidings::feed::{FeedLocator, FeedSyncCoordinator, HttpFetcher, REQUEST_TIMEOUT};
//! use tidings::util::UrlPolicy;
//!
//! let fetcher = HttpFetcher::new(UrlPolicy::PublicOnly, REQUEST_TIMEOUT)?;
//! let sync = FeedSyncCoordinator::new(db, FeedLocator::new(fetcher));
//! let feed = sync.add_feed("example.com", None).await?;
//! ```

mod discovery;
mod http;
mod maintenance;
mod opml;
mod parser;
mod sync;

pub use discovery::{DiscoveryError, FeedLocator};
pub use http::{FetchError, HttpFetcher, REQUEST_TIMEOUT};
pub use maintenance::{CleanupResult, MaintenanceService};
pub use opml::{
    export_document, parse_outlines, write_atomically, ImportFailure, ImportResult, OpmlError,
    OpmlInterchange, Outline,
};
pub use parser::{parse, ParseError, ParsedArticle, ParsedFeed};
pub use sync::{FeedSyncCoordinator, RefreshOutcome, RefreshSummary, SyncError, DEFAULT_BATCH_SIZE};
