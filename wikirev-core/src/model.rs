//! Page and revision model for the wiki store
//!
//! Revisions of a page form a singly linked chain through `next_id`. The
//! chain is stored as plain row ids so any backend can hold it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned revision row identifier
pub type RevisionId = i64;

/// User identifier as known to the user directory
pub type UserId = i64;

/// Case-insensitive identity key for a page name.
///
/// Surrounding '/' are trimmed before lowercasing, so "/Foo/Bar/" and
/// "foo/bar" address the same page.
pub fn page_key(name: &str) -> String {
    name.trim_matches('/').to_lowercase()
}

/// A page name with surrounding '/' removed and original case preserved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageName(String);

impl PageName {
    /// Normalize a raw page name
    pub fn new(raw: &str) -> Self {
        Self(raw.trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity key used for lookups and caching
    pub fn key(&self) -> String {
        page_key(&self.0)
    }

    /// True when the name is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Sub-pages ("Parent/Child") are never orphans on their own
    pub fn is_sub_page(&self) -> bool {
        self.0.contains('/')
    }
}

impl std::fmt::Display for PageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical state of a stored revision, derived from (is_deleted, next_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionState {
    /// Live and without successor: the current revision of its page
    Tip,
    /// Live, superseded by a later revision
    Historical,
    /// Soft-deleted, kept for history and undelete
    Tombstone,
}

/// A revision as held by a store, including its concurrency token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRow {
    pub id: RevisionId,
    pub page_name: String,
    pub revision_number: u32,
    pub markup: String,
    pub author_id: UserId,
    /// Joined from the user directory on read
    pub author_name: Option<String>,
    pub create_timestamp: DateTime<Utc>,
    pub is_deleted: bool,
    pub next_id: Option<RevisionId>,
    pub minor_edit: bool,
    pub revision_message: Option<String>,
    /// Row version, bumped by the store on every mutation
    pub version: u64,
}

impl RevisionRow {
    pub fn state(&self) -> RevisionState {
        match (self.is_deleted, self.next_id) {
            (true, _) => RevisionState::Tombstone,
            (false, None) => RevisionState::Tip,
            (false, Some(_)) => RevisionState::Historical,
        }
    }

    pub fn page_key(&self) -> String {
        page_key(&self.page_name)
    }

    /// (id, version) pair used for optimistic concurrency checks
    pub fn token(&self) -> (RevisionId, u64) {
        (self.id, self.version)
    }
}

/// Externally visible view of a revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub page_name: String,
    pub revision_number: u32,
    pub markup: String,
    pub author_id: UserId,
    pub author_name: Option<String>,
    pub create_timestamp: DateTime<Utc>,
    pub minor_edit: bool,
    pub revision_message: Option<String>,
    pub is_deleted: bool,
    pub is_current: bool,
}

impl Revision {
    pub fn from_row(row: &RevisionRow, is_current: bool) -> Self {
        Self {
            id: row.id,
            page_name: row.page_name.clone(),
            revision_number: row.revision_number,
            markup: row.markup.clone(),
            author_id: row.author_id,
            author_name: row.author_name.clone(),
            create_timestamp: row.create_timestamp,
            minor_edit: row.minor_edit,
            revision_message: row.revision_message.clone(),
            is_deleted: row.is_deleted,
            is_current,
        }
    }

    pub fn page_key(&self) -> String {
        page_key(&self.page_name)
    }
}

/// A recorded outbound link from a page's current markup
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Referral {
    /// Page containing the link
    pub referrer: String,
    /// Target page name or symbolic token
    pub referral: String,
    /// Text around the link, informational only
    pub excerpt: String,
}

/// A link found in markup by a [`crate::links::LinkExtractor`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtractedLink {
    pub target: String,
    pub excerpt: String,
}

impl ExtractedLink {
    pub fn new(target: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            excerpt: excerpt.into(),
        }
    }
}
