//! In-memory revision store
//!
//! Keeps every table in process memory behind a single lock. Batches are
//! validated in full before the first row is touched, so a rejected batch
//! leaves no trace.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::model::{page_key, Referral, RevisionId, RevisionRow, UserId};
use crate::storage::{
    parked_key, referral_key, tokens, ReferralWrite, Result, RevisionStore, StorageError,
    Successor, UserDirectory, WriteBatch,
};

#[derive(Debug, Clone)]
struct ReferralRecord {
    referrer_key: String,
    target_key: String,
    referral: Referral,
}

#[derive(Debug, Default)]
struct MemoryState {
    revisions: BTreeMap<RevisionId, RevisionRow>,
    last_revision_id: RevisionId,
    users: HashMap<UserId, String>,
    last_user_id: UserId,
    referrals: Vec<ReferralRecord>,
}

impl MemoryState {
    fn rows_for(&self, key: &str) -> Vec<RevisionRow> {
        let mut rows: Vec<RevisionRow> = self
            .revisions
            .values()
            .filter(|r| r.page_key() == key)
            .map(|r| self.with_author(r))
            .collect();
        rows.sort_by_key(|r| r.revision_number);
        rows
    }

    fn with_author(&self, row: &RevisionRow) -> RevisionRow {
        let mut row = row.clone();
        row.author_name = self.users.get(&row.author_id).cloned();
        row
    }

    /// Reject the batch if applying it would break a store rule
    fn validate(&self, batch: &WriteBatch) -> Result<()> {
        for guard in &batch.guards {
            let current = tokens(
                self.revisions
                    .values()
                    .filter(|r| r.page_key() == guard.page_key),
            );
            if current != guard.observed {
                return Err(StorageError::Conflict(format!(
                    "page '{}' changed since it was read",
                    guard.page_key
                )));
            }
        }

        if let Some(new) = &batch.insert {
            if !self.users.contains_key(&new.author_id) {
                return Err(StorageError::Integrity(format!(
                    "author {} does not exist",
                    new.author_id
                )));
            }
        }

        for update in &batch.updates {
            if !self.revisions.contains_key(&update.id) {
                return Err(StorageError::Conflict(format!(
                    "revision {} no longer exists",
                    update.id
                )));
            }
            if let Successor::Revision(next) = update.next {
                if !self.revisions.contains_key(&next) {
                    return Err(StorageError::Integrity(format!(
                        "successor revision {} does not exist",
                        next
                    )));
                }
            }
        }

        // (page, revision number) must stay unique on every page the batch touches
        let renamed: HashMap<RevisionId, String> = batch
            .updates
            .iter()
            .filter_map(|u| u.page_name.as_deref().map(|name| (u.id, page_key(name))))
            .collect();
        let mut affected: HashSet<String> = renamed.values().cloned().collect();
        if let Some(new) = &batch.insert {
            affected.insert(page_key(&new.page_name));
        }
        let mut taken: HashSet<(String, u32)> = HashSet::new();
        for row in self.revisions.values() {
            let key = renamed.get(&row.id).cloned().unwrap_or_else(|| row.page_key());
            if affected.contains(&key) && !taken.insert((key, row.revision_number)) {
                return Err(StorageError::Conflict(format!(
                    "revision {} of '{}' already exists",
                    row.revision_number, row.page_name
                )));
            }
        }
        if let Some(new) = &batch.insert {
            if !taken.insert((page_key(&new.page_name), new.revision_number)) {
                return Err(StorageError::Conflict(format!(
                    "revision {} of '{}' already exists",
                    new.revision_number, new.page_name
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) -> Option<RevisionId> {
        let inserted = batch.insert.map(|new| {
            self.last_revision_id += 1;
            let id = self.last_revision_id;
            self.revisions.insert(
                id,
                RevisionRow {
                    id,
                    page_name: new.page_name,
                    revision_number: new.revision_number,
                    markup: new.markup,
                    author_id: new.author_id,
                    author_name: None,
                    create_timestamp: new.create_timestamp,
                    is_deleted: false,
                    next_id: None,
                    minor_edit: new.minor_edit,
                    revision_message: new.revision_message,
                    version: 0,
                },
            );
            id
        });

        for update in batch.updates {
            if let Some(row) = self.revisions.get_mut(&update.id) {
                row.is_deleted = update.is_deleted;
                row.next_id = match update.next {
                    Successor::None => None,
                    Successor::Revision(id) => Some(id),
                    Successor::Inserted => inserted,
                };
                if let Some(name) = update.page_name {
                    row.page_name = name;
                }
                row.version += 1;
            }
        }

        for write in &batch.referrals {
            if let ReferralWrite::Rename { from_key, .. } = write {
                let parked = parked_key(from_key);
                for record in self
                    .referrals
                    .iter_mut()
                    .filter(|r| &r.referrer_key == from_key)
                {
                    record.referrer_key = parked.clone();
                }
            }
        }

        for write in batch.referrals {
            match write {
                ReferralWrite::Replace { referrer, links } => {
                    let referrer_key = page_key(&referrer);
                    self.referrals.retain(|r| r.referrer_key != referrer_key);
                    self.referrals.extend(links.into_iter().map(|link| ReferralRecord {
                        referrer_key: referrer_key.clone(),
                        target_key: referral_key(&link.target),
                        referral: Referral {
                            referrer: referrer.clone(),
                            referral: link.target,
                            excerpt: link.excerpt,
                        },
                    }));
                }
                ReferralWrite::Clear { referrer_key } => {
                    self.referrals.retain(|r| r.referrer_key != referrer_key);
                }
                ReferralWrite::Rename { from_key, to } => {
                    let to_key = page_key(&to);
                    let parked = parked_key(&from_key);
                    for record in self.referrals.iter_mut().filter(|r| r.referrer_key == parked) {
                        record.referrer_key = to_key.clone();
                        record.referral.referrer = to.clone();
                    }
                }
            }
        }

        inserted
    }
}

/// Revision store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its id
    pub async fn add_user(&self, name: &str) -> Result<UserId> {
        let mut state = self.state.write().await;
        state.last_user_id += 1;
        let id = state.last_user_id;
        state.users.insert(id, name.to_string());
        Ok(id)
    }

    /// Number of revision rows, deleted ones included
    pub async fn revision_count(&self) -> usize {
        self.state.read().await.revisions.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn user_name(&self, id: UserId) -> Result<Option<String>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl RevisionStore for MemoryStore {
    async fn page_revisions(&self, page_key: &str) -> Result<Vec<RevisionRow>> {
        Ok(self.state.read().await.rows_for(page_key))
    }

    async fn prefix_revisions(&self, prefix_key: &str) -> Result<Vec<RevisionRow>> {
        let state = self.state.read().await;
        let below = format!("{}/", prefix_key);
        let mut rows: Vec<RevisionRow> = state
            .revisions
            .values()
            .filter(|r| {
                let key = r.page_key();
                key == prefix_key || key.starts_with(&below)
            })
            .map(|r| state.with_author(r))
            .collect();
        rows.sort_by(|a, b| {
            a.page_key()
                .cmp(&b.page_key())
                .then(a.revision_number.cmp(&b.revision_number))
        });
        Ok(rows)
    }

    async fn live_revisions(&self) -> Result<Vec<RevisionRow>> {
        let state = self.state.read().await;
        Ok(state
            .revisions
            .values()
            .filter(|r| !r.is_deleted)
            .map(|r| state.with_author(r))
            .collect())
    }

    async fn referrals(&self) -> Result<Vec<Referral>> {
        let state = self.state.read().await;
        Ok(state.referrals.iter().map(|r| r.referral.clone()).collect())
    }

    async fn referrals_from(&self, referrer_key: &str) -> Result<Vec<Referral>> {
        let state = self.state.read().await;
        Ok(state
            .referrals
            .iter()
            .filter(|r| r.referrer_key == referrer_key)
            .map(|r| r.referral.clone())
            .collect())
    }

    async fn referrals_to(&self, target_key: &str) -> Result<Vec<Referral>> {
        let state = self.state.read().await;
        Ok(state
            .referrals
            .iter()
            .filter(|r| r.target_key == target_key)
            .map(|r| r.referral.clone())
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Option<RevisionId>> {
        let mut state = self.state.write().await;
        state.validate(&batch)?;
        Ok(state.apply(batch))
    }
}
