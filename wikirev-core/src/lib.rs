//! Wikirev Core Library
//!
//! Versioned page storage for a wiki-style site, including:
//! - Page and revision model with soft-deleted (tombstoned) revisions
//! - Current-revision resolution over a page's revision chain
//! - Storage abstraction with guarded, atomic write batches
//! - In-memory store and SQLite store (WAL mode)
//! - Referral index with orphan and broken-link queries
//! - Read-through cache of current revisions

pub mod cache;
pub mod config;
pub mod error;
pub mod links;
pub mod memory_store;
pub mod model;
pub mod pages;
pub mod referrals;
pub mod resolver;
pub mod sqlite_store;
pub mod storage;

pub use cache::{LruPageCache, PageCache};
pub use config::WikiConfig;
pub use error::{Result, WikiError};
pub use links::{BracketLinkExtractor, LinkExtractor};
pub use memory_store::MemoryStore;
pub use model::{
    page_key, ExtractedLink, PageName, Referral, Revision, RevisionId, RevisionRow, RevisionState,
    UserId,
};
pub use pages::{PageEdit, WikiPages};
pub use sqlite_store::SqliteStore;
pub use storage::{RevisionStore, StorageError, UserDirectory, WriteBatch};
