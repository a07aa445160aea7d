//! Storage abstraction layer for wiki revisions
//!
//! A store holds revision rows, users and the referral index. Mutations are
//! submitted as a [`WriteBatch`] that the store applies atomically, after
//! checking the batch's page guards against the rows it currently holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{page_key, ExtractedLink, Referral, RevisionId, RevisionRow, UserId};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A guarded row changed since it was read, or the write would collide
    /// with a concurrent one
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// A referential or uniqueness rule the caller was responsible for
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// A revision to be inserted; the store assigns its id
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub page_name: String,
    pub revision_number: u32,
    pub markup: String,
    pub author_id: UserId,
    pub create_timestamp: DateTime<Utc>,
    pub minor_edit: bool,
    pub revision_message: Option<String>,
}

/// Successor link written by an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    None,
    Revision(RevisionId),
    /// The revision inserted by the same batch
    Inserted,
}

impl From<Option<RevisionId>> for Successor {
    fn from(id: Option<RevisionId>) -> Self {
        match id {
            Some(id) => Successor::Revision(id),
            None => Successor::None,
        }
    }
}

/// New values for the mutable columns of an existing revision
#[derive(Debug, Clone)]
pub struct RevisionUpdate {
    pub id: RevisionId,
    pub is_deleted: bool,
    pub next: Successor,
    /// Set when the revision moves to another page
    pub page_name: Option<String>,
}

impl RevisionUpdate {
    /// An update that keeps the row as it is
    pub fn of(row: &RevisionRow) -> Self {
        Self {
            id: row.id,
            is_deleted: row.is_deleted,
            next: row.next_id.into(),
            page_name: None,
        }
    }

    pub fn deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = is_deleted;
        self
    }

    pub fn next(mut self, next: Successor) -> Self {
        self.next = next;
        self
    }

    pub fn renamed(mut self, page_name: impl Into<String>) -> Self {
        self.page_name = Some(page_name.into());
        self
    }
}

/// Change to the referral index
#[derive(Debug, Clone)]
pub enum ReferralWrite {
    /// Drop every row of `referrer` and record `links` instead
    Replace {
        referrer: String,
        links: Vec<ExtractedLink>,
    },
    /// Drop every row whose referrer has this key
    Clear { referrer_key: String },
    /// Move rows from one referrer to another, targets unchanged. Every
    /// rename in a batch sees the rows as they stood before the batch.
    Rename { from_key: String, to: String },
}

/// Row tokens of one page as observed before building a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageGuard {
    pub page_key: String,
    /// (id, version) pairs sorted by id; empty means the page must not exist
    pub observed: Vec<(RevisionId, u64)>,
}

/// A unit of mutation applied atomically by a store
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub guards: Vec<PageGuard>,
    pub insert: Option<NewRevision>,
    pub updates: Vec<RevisionUpdate>,
    pub referrals: Vec<ReferralWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the rows of `key` to be exactly `rows` at commit time
    pub fn guard(&mut self, key: &str, rows: &[RevisionRow]) {
        self.guards.push(PageGuard {
            page_key: key.to_string(),
            observed: tokens(rows.iter()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_none() && self.updates.is_empty() && self.referrals.is_empty()
    }
}

/// Sorted (id, version) pairs of a set of rows
pub fn tokens<'a, I>(rows: I) -> Vec<(RevisionId, u64)>
where
    I: IntoIterator<Item = &'a RevisionRow>,
{
    let mut tokens: Vec<_> = rows.into_iter().map(RevisionRow::token).collect();
    tokens.sort_unstable();
    tokens
}

/// Key of the page a referral points at
pub fn referral_key(target: &str) -> String {
    page_key(target)
}

/// Referrer key a rename parks rows under until its own write runs
pub(crate) fn parked_key(referrer_key: &str) -> String {
    format!("\u{0}{}", referrer_key)
}

/// User lookup consumed by the revision orchestrator
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Display name of the user, or `None` when no such user exists
    async fn user_name(&self, id: UserId) -> Result<Option<String>>;
}

/// Durable collection of page revisions and their referral index
///
/// All backends must implement this trait
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// All revisions of one page, ascending by revision number
    async fn page_revisions(&self, page_key: &str) -> Result<Vec<RevisionRow>>;

    /// Revisions of `prefix_key` itself and of every page below `prefix_key/`
    async fn prefix_revisions(&self, prefix_key: &str) -> Result<Vec<RevisionRow>>;

    /// Every non-deleted revision in the store
    async fn live_revisions(&self) -> Result<Vec<RevisionRow>>;

    /// The whole referral index
    async fn referrals(&self) -> Result<Vec<Referral>>;

    /// Rows recorded for the page with this key
    async fn referrals_from(&self, referrer_key: &str) -> Result<Vec<Referral>>;

    /// Rows pointing at the page with this key
    async fn referrals_to(&self, target_key: &str) -> Result<Vec<Referral>>;

    /// Apply a batch atomically, returning the id of the inserted revision.
    ///
    /// Fails with [`StorageError::Conflict`] and changes nothing when a guard
    /// no longer matches or (page, revision number) would stop being unique.
    async fn commit(&self, batch: WriteBatch) -> Result<Option<RevisionId>>;
}
