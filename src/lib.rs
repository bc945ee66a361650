//! Feed ingestion engine.
//!
//! `tidings` discovers RSS/Atom feeds, parses them with a streaming parser,
//! keeps a SQLite article store in sync, exchanges subscriptions as OPML and
//! caches rendered article HTML on disk with size and age limits.
//!
//! The binary in `main.rs` is a thin CLI over these modules.

pub mod cache;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
