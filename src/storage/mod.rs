//! SQLite-backed feed store.
//!
//! The engine only needs insert, filtered query (sort + limit), transactional
//! save and delete with cascade/nullify semantics; [`Database`] provides
//! exactly that over `sqlx`.

mod articles;
mod feeds;
mod folders;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Article, DatabaseError, Feed, FeedQuery, FeedSort, Folder, FolderScope, NewArticle, NewFeed,
};
