//! Wiki page operations
//!
//! [`WikiPages`] coordinates the revision store, the referral index and the
//! page cache. Every mutating operation reads the rows it depends on, builds
//! one [`WriteBatch`] guarded by the tokens of those rows and commits it. The
//! cache is touched only after the commit succeeded, or evicted when it did
//! not.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{LruPageCache, PageCache};
use crate::config::WikiConfig;
use crate::error::{Result, WikiError};
use crate::links::{BracketLinkExtractor, LinkExtractor};
use crate::model::{
    page_key, PageName, Referral, Revision, RevisionId, RevisionRow, RevisionState, UserId,
};
use crate::referrals;
use crate::resolver;
use crate::storage::{
    NewRevision, ReferralWrite, RevisionStore, RevisionUpdate, StorageError, Successor,
    UserDirectory, WriteBatch,
};

/// A new revision submitted by an editor
#[derive(Debug, Clone)]
pub struct PageEdit {
    pub page_name: String,
    pub markup: String,
    pub author_id: UserId,
    /// When the editor loaded the page. An edit is rejected if the page's
    /// current revision was created after this instant.
    pub started_at: DateTime<Utc>,
    pub minor_edit: bool,
    pub revision_message: Option<String>,
}

impl PageEdit {
    /// An edit starting now
    pub fn new(page_name: impl Into<String>, markup: impl Into<String>, author_id: UserId) -> Self {
        Self {
            page_name: page_name.into(),
            markup: markup.into(),
            author_id,
            started_at: Utc::now(),
            minor_edit: false,
            revision_message: None,
        }
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn minor(mut self, minor_edit: bool) -> Self {
        self.minor_edit = minor_edit;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.revision_message = Some(message.into());
        self
    }
}

enum CommitOutcome {
    Committed(Option<RevisionId>),
    Conflict,
}

/// Commit time, truncated to what every backend can store
fn commit_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn current_revision(rows: &[RevisionRow]) -> Option<Revision> {
    resolver::resolve(rows).map(|row| Revision::from_row(row, true))
}

/// Versioned wiki page store
pub struct WikiPages {
    store: Arc<dyn RevisionStore>,
    users: Arc<dyn UserDirectory>,
    links: Arc<dyn LinkExtractor>,
    cache: Arc<dyn PageCache>,
    config: WikiConfig,
}

impl WikiPages {
    pub fn new(
        store: Arc<dyn RevisionStore>,
        users: Arc<dyn UserDirectory>,
        links: Arc<dyn LinkExtractor>,
        cache: Arc<dyn PageCache>,
        config: WikiConfig,
    ) -> Self {
        Self {
            store,
            users,
            links,
            cache,
            config,
        }
    }

    /// Use one backend as both store and user directory, with the bracket
    /// link extractor and an LRU cache sized from `config`.
    pub fn with_store<S>(store: Arc<S>, config: WikiConfig) -> Self
    where
        S: RevisionStore + UserDirectory + 'static,
    {
        let cache = Arc::new(LruPageCache::new(config.cache_capacity));
        Self::new(
            store.clone(),
            store,
            Arc::new(BracketLinkExtractor::new()),
            cache,
            config,
        )
    }

    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    async fn commit(&self, keys: &[String], batch: WriteBatch) -> Result<CommitOutcome> {
        match self.store.commit(batch).await {
            Ok(inserted) => Ok(CommitOutcome::Committed(inserted)),
            Err(e) if e.is_conflict() => {
                warn!("Write to {:?} rejected: {}", keys, e);
                for key in keys {
                    self.cache.evict(key);
                }
                Ok(CommitOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn referral_replace(&self, referrer: &str, markup: &str) -> ReferralWrite {
        ReferralWrite::Replace {
            referrer: referrer.to_string(),
            links: self.links.extract_links(markup).into_iter().collect(),
        }
    }

    /// True when `key` has any revision or is cached
    fn is_taken(&self, key: &str, rows: &[RevisionRow]) -> bool {
        !rows.is_empty() || self.cache.try_get(key).is_some()
    }

    // ==================== Reads ====================

    /// Current revision of a page straight from the store
    pub async fn resolve(&self, page_name: &str) -> Result<Option<Revision>> {
        let rows = self.store.page_revisions(&page_key(page_name)).await?;
        Ok(current_revision(&rows))
    }

    /// A specific revision, deleted or not
    pub async fn resolve_historical(
        &self,
        page_name: &str,
        revision_number: u32,
    ) -> Result<Option<Revision>> {
        let rows = self.store.page_revisions(&page_key(page_name)).await?;
        let current_id = resolver::resolve(&rows).map(|r| r.id);
        Ok(resolver::resolve_historical(&rows, revision_number)
            .map(|row| Revision::from_row(row, Some(row.id) == current_id)))
    }

    /// Whether a page exists; with `include_deleted` any revision counts
    pub async fn exists(&self, page_name: &str, include_deleted: bool) -> Result<bool> {
        if include_deleted {
            let rows = self.store.page_revisions(&page_key(page_name)).await?;
            return Ok(!rows.is_empty());
        }
        Ok(self.page(page_name, None).await?.is_some())
    }

    /// The current revision, or a specific one when `revision_number` is set
    pub async fn page(
        &self,
        page_name: &str,
        revision_number: Option<u32>,
    ) -> Result<Option<Revision>> {
        if let Some(number) = revision_number {
            return self.resolve_historical(page_name, number).await;
        }

        let key = PageName::new(page_name).key();
        if let Some(hit) = self.cache.try_get(&key) {
            debug!("Cache hit for page '{}'", key);
            return Ok(Some(hit));
        }

        let current = self.resolve(page_name).await?;
        if let Some(revision) = &current {
            self.cache.set(revision.clone());
        }
        Ok(current)
    }

    /// Every revision of a page including tombstones, oldest first
    pub async fn history(&self, page_name: &str) -> Result<Vec<Revision>> {
        let rows = self.store.page_revisions(&page_key(page_name)).await?;
        let current_id = resolver::resolve(&rows).map(|r| r.id);
        Ok(rows
            .iter()
            .map(|row| Revision::from_row(row, Some(row.id) == current_id))
            .collect())
    }

    /// Referrals pointing at a page
    pub async fn referrers(&self, page_name: &str) -> Result<Vec<Referral>> {
        Ok(self.store.referrals_to(&page_key(page_name)).await?)
    }

    /// Referrals recorded for a page's current revision
    pub async fn outbound_referrals(&self, page_name: &str) -> Result<Vec<Referral>> {
        Ok(self.store.referrals_from(&page_key(page_name)).await?)
    }

    /// Names of the current pages below `page_name/`
    pub async fn sub_pages(&self, page_name: &str) -> Result<Vec<String>> {
        let key = page_key(page_name);
        let rows = self.store.prefix_revisions(&key).await?;
        Ok(resolver::current_revisions(&rows)
            .into_iter()
            .filter(|row| row.page_key() != key)
            .map(|row| row.page_name.clone())
            .collect())
    }

    /// Current top-level pages with no inbound referral
    pub async fn orphans(&self) -> Result<Vec<Revision>> {
        let live = self.store.live_revisions().await?;
        let current = resolver::current_revisions(&live);
        let referrals = self.store.referrals().await?;
        Ok(referrals::orphans(&current, &referrals, &self.config)
            .into_iter()
            .map(|row| Revision::from_row(row, true))
            .collect())
    }

    /// Referrals whose target does not currently exist
    pub async fn broken_links(&self) -> Result<Vec<Referral>> {
        let live = self.store.live_revisions().await?;
        let existing: HashSet<String> = resolver::current_revisions(&live)
            .into_iter()
            .map(RevisionRow::page_key)
            .collect();
        let referrals = self.store.referrals().await?;
        Ok(referrals::broken_links(&referrals, &existing, &self.config))
    }

    // ==================== Mutations ====================

    /// Add a revision to a page, creating the page if needed.
    ///
    /// Returns `None` when the edit conflicts with a revision committed after
    /// `edit.started_at` or with a concurrent writer.
    pub async fn add(&self, edit: PageEdit) -> Result<Option<Revision>> {
        let name = PageName::new(&edit.page_name);
        if name.is_blank() {
            return Err(WikiError::Integrity("page name must not be empty".to_string()));
        }
        let author_name = self
            .users
            .user_name(edit.author_id)
            .await?
            .ok_or_else(|| {
                WikiError::Integrity(format!("author {} does not exist", edit.author_id))
            })?;

        let key = name.key();
        let rows = self.store.page_revisions(&key).await?;
        let tip = resolver::resolve(&rows);

        if let Some(tip) = tip {
            if tip.create_timestamp > edit.started_at {
                warn!(
                    "Edit conflict on '{}': revision {} is newer than the edit",
                    name, tip.revision_number
                );
                self.cache.evict(&key);
                return Ok(None);
            }
        }

        // An existing page keeps the spelling it is stored under
        let page_name = rows
            .last()
            .map(|r| r.page_name.clone())
            .unwrap_or_else(|| name.as_str().to_string());
        let revision_number = resolver::max_revision_number(&rows).map_or(1, |n| n + 1);
        let create_timestamp = commit_timestamp();

        let mut batch = WriteBatch::new();
        batch.guard(&key, &rows);
        batch.insert = Some(NewRevision {
            page_name: page_name.clone(),
            revision_number,
            markup: edit.markup.clone(),
            author_id: edit.author_id,
            create_timestamp,
            minor_edit: edit.minor_edit,
            revision_message: edit.revision_message.clone(),
        });
        if let Some(tip) = tip {
            batch
                .updates
                .push(RevisionUpdate::of(tip).next(Successor::Inserted));
        }
        batch.referrals.push(self.referral_replace(&page_name, &edit.markup));

        let id = match self.commit(std::slice::from_ref(&key), batch).await? {
            CommitOutcome::Committed(Some(id)) => id,
            CommitOutcome::Committed(None) => {
                return Err(WikiError::Storage(StorageError::Database(format!(
                    "no id assigned to revision {} of '{}'",
                    revision_number, page_name
                ))));
            }
            CommitOutcome::Conflict => return Ok(None),
        };

        let revision = Revision {
            id,
            page_name,
            revision_number,
            markup: edit.markup,
            author_id: edit.author_id,
            author_name: Some(author_name),
            create_timestamp,
            minor_edit: edit.minor_edit,
            revision_message: edit.revision_message,
            is_deleted: false,
            is_current: true,
        };
        self.cache.set(revision.clone());
        info!(
            "Added revision {} of '{}' by user {}",
            revision.revision_number, revision.page_name, revision.author_id
        );
        Ok(Some(revision))
    }

    /// Tombstone every revision of a page.
    ///
    /// Returns the number of revisions affected, or `None` on conflict.
    pub async fn delete_page(&self, page_name: &str) -> Result<Option<usize>> {
        let key = page_key(page_name);
        let rows = self.store.page_revisions(&key).await?;
        if rows.is_empty() {
            return Ok(Some(0));
        }

        let mut batch = WriteBatch::new();
        batch.guard(&key, &rows);
        batch.updates.extend(
            rows.iter()
                .map(|row| RevisionUpdate::of(row).deleted(true).next(Successor::None)),
        );
        batch.referrals.push(ReferralWrite::Clear {
            referrer_key: key.clone(),
        });

        match self.commit(std::slice::from_ref(&key), batch).await? {
            CommitOutcome::Committed(_) => {
                self.cache.evict(&key);
                info!("Deleted page '{}' ({} revisions)", key, rows.len());
                Ok(Some(rows.len()))
            }
            CommitOutcome::Conflict => Ok(None),
        }
    }

    /// Tombstone one revision. Returns `false` only on conflict.
    pub async fn delete_revision(&self, page_name: &str, revision_number: u32) -> Result<bool> {
        let key = page_key(page_name);
        let rows = self.store.page_revisions(&key).await?;
        let Some(target) = resolver::resolve_historical(&rows, revision_number) else {
            return Ok(true);
        };
        if target.is_deleted {
            return Ok(true);
        }
        let is_current = resolver::resolve(&rows).map(|r| r.id) == Some(target.id);

        let mut batch = WriteBatch::new();
        batch.guard(&key, &rows);
        batch.updates.push(RevisionUpdate::of(target).deleted(true));

        let new_tip = if is_current {
            let new_tip = resolver::resolve(rows.iter().filter(|r| r.id != target.id));
            match new_tip {
                Some(row) => {
                    batch
                        .updates
                        .push(RevisionUpdate::of(row).next(Successor::None));
                    batch.referrals.push(self.referral_replace(&row.page_name, &row.markup));
                }
                None => batch.referrals.push(ReferralWrite::Clear {
                    referrer_key: key.clone(),
                }),
            }
            new_tip
        } else {
            None
        };

        if let CommitOutcome::Conflict = self.commit(std::slice::from_ref(&key), batch).await? {
            return Ok(false);
        }

        if is_current {
            match new_tip {
                Some(row) => self.cache.set(Revision::from_row(row, true)),
                None => self.cache.evict(&key),
            }
        }
        info!("Deleted revision {} of '{}'", revision_number, key);
        Ok(true)
    }

    /// Restore the deleted tail of a page's history.
    ///
    /// Every revision above the highest live one (all of them when none is
    /// live) is restored and chained in ascending order; the highest becomes
    /// current. Returns `false` only on conflict.
    pub async fn undelete(&self, page_name: &str) -> Result<bool> {
        let key = page_key(page_name);
        let rows = self.store.page_revisions(&key).await?;
        if rows.is_empty() || rows.iter().any(|r| r.state() == RevisionState::Tip) {
            return Ok(true);
        }

        let last_visible = resolver::resolve(&rows);
        let floor = last_visible.map_or(0, |r| r.revision_number);
        // rows are ascending by revision number
        let chain: Vec<&RevisionRow> = last_visible
            .into_iter()
            .chain(rows.iter().filter(|r| r.revision_number > floor))
            .collect();
        let Some(&new_tip) = chain.last() else {
            return Ok(true);
        };

        let mut batch = WriteBatch::new();
        batch.guard(&key, &rows);
        for (i, row) in chain.iter().enumerate() {
            let next = chain
                .get(i + 1)
                .map_or(Successor::None, |n| Successor::Revision(n.id));
            batch
                .updates
                .push(RevisionUpdate::of(row).deleted(false).next(next));
        }
        batch
            .referrals
            .push(self.referral_replace(&new_tip.page_name, &new_tip.markup));

        if let CommitOutcome::Conflict = self.commit(std::slice::from_ref(&key), batch).await? {
            return Ok(false);
        }

        let mut revision = Revision::from_row(new_tip, true);
        revision.is_deleted = false;
        self.cache.set(revision);
        info!(
            "Undeleted '{}' up to revision {}",
            key, new_tip.revision_number
        );
        Ok(true)
    }

    /// Rename a page with its whole history.
    ///
    /// Fails with [`WikiError::DestinationExists`] when another page already
    /// uses `destination`. Returns `false` only on conflict.
    pub async fn move_page(&self, original: &str, destination: &str) -> Result<bool> {
        let to = PageName::new(destination);
        if to.is_blank() {
            return Err(WikiError::Integrity(
                "move destination must not be empty".to_string(),
            ));
        }
        let from_key = page_key(original);
        let to_key = to.key();

        let dest_rows = if from_key == to_key {
            Vec::new()
        } else {
            let dest_rows = self.store.page_revisions(&to_key).await?;
            if self.is_taken(&to_key, &dest_rows) {
                return Err(WikiError::DestinationExists(to.to_string()));
            }
            dest_rows
        };

        let rows = self.store.page_revisions(&from_key).await?;
        if rows.is_empty() {
            return Ok(true);
        }

        let mut batch = WriteBatch::new();
        batch.guard(&from_key, &rows);
        if from_key != to_key {
            batch.guard(&to_key, &dest_rows);
        }
        batch
            .updates
            .extend(rows.iter().map(|row| RevisionUpdate::of(row).renamed(to.as_str())));
        batch.referrals.push(ReferralWrite::Rename {
            from_key: from_key.clone(),
            to: to.as_str().to_string(),
        });

        let keys = [from_key.clone(), to_key];
        if let CommitOutcome::Conflict = self.commit(&keys, batch).await? {
            return Ok(false);
        }

        self.relocate_cached(&from_key, to.as_str(), &rows);
        info!("Moved '{}' to '{}'", from_key, to);
        Ok(true)
    }

    /// Rename `original_prefix` and every page below it, rewriting only the
    /// prefix part of each name. Returns `false` only on conflict.
    pub async fn move_all(&self, original_prefix: &str, destination_prefix: &str) -> Result<bool> {
        let to = PageName::new(destination_prefix);
        if to.is_blank() {
            return Err(WikiError::Integrity(
                "move destination must not be empty".to_string(),
            ));
        }
        let from = PageName::new(original_prefix);
        let from_key = from.key();
        let prefix_chars = from.as_str().chars().count();

        let rows = self.store.prefix_revisions(&from_key).await?;
        if rows.is_empty() {
            return Ok(true);
        }
        let mut pages: BTreeMap<String, Vec<RevisionRow>> = BTreeMap::new();
        for row in rows {
            pages.entry(row.page_key()).or_default().push(row);
        }

        let mut batch = WriteBatch::new();
        let mut keys = Vec::new();
        let mut renames = Vec::new();
        for (key, page_rows) in &pages {
            let Some(first) = page_rows.first() else {
                continue;
            };
            let suffix: String = first.page_name.chars().skip(prefix_chars).collect();
            let new_name = format!("{}{}", to.as_str(), suffix);
            let new_key = page_key(&new_name);

            if new_key != *key && !pages.contains_key(&new_key) {
                let dest_rows = self.store.page_revisions(&new_key).await?;
                if self.is_taken(&new_key, &dest_rows) {
                    return Err(WikiError::DestinationExists(new_name));
                }
                batch.guard(&new_key, &dest_rows);
            }
            batch.guard(key, page_rows);
            batch.updates.extend(
                page_rows
                    .iter()
                    .map(|row| RevisionUpdate::of(row).renamed(new_name.clone())),
            );
            batch.referrals.push(ReferralWrite::Rename {
                from_key: key.clone(),
                to: new_name.clone(),
            });
            keys.push(key.clone());
            keys.push(new_key);
            renames.push((key.clone(), new_name));
        }

        if let CommitOutcome::Conflict = self.commit(&keys, batch).await? {
            return Ok(false);
        }

        // A new name may equal another moved page's old key
        for (key, _) in &renames {
            self.cache.evict(key);
        }
        for (key, new_name) in &renames {
            if let Some(mut revision) = pages.get(key).and_then(|rows| current_revision(rows)) {
                revision.page_name = new_name.clone();
                self.cache.set(revision);
            }
        }
        info!("Moved '{}' and its sub-pages to '{}'", from, to);
        Ok(true)
    }

    /// Drop the entry under `from_key` and cache the moved page's current
    /// revision under its new name
    fn relocate_cached(&self, from_key: &str, new_name: &str, rows: &[RevisionRow]) {
        self.cache.evict(from_key);
        if let Some(mut revision) = current_revision(rows) {
            revision.page_name = new_name.to_string();
            self.cache.set(revision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use chrono::Duration;

    async fn setup() -> (WikiPages, Arc<MemoryStore>, Arc<LruPageCache>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("Bisqwit").await.unwrap();
        let cache = Arc::new(LruPageCache::new(64));
        let pages = WikiPages::new(
            store.clone(),
            store.clone(),
            Arc::new(BracketLinkExtractor::new()),
            cache.clone(),
            WikiConfig::default(),
        );
        (pages, store, cache, user)
    }

    async fn add(pages: &WikiPages, page: &str, markup: &str, user: UserId) -> Revision {
        pages
            .add(PageEdit::new(page, markup, user))
            .await
            .unwrap()
            .expect("edit should not conflict")
    }

    #[tokio::test]
    async fn test_add_creates_first_revision() {
        let (pages, _, cache, user) = setup().await;
        let rev = add(&pages, "/FrontPage/", "Welcome", user).await;
        assert_eq!(rev.page_name, "FrontPage");
        assert_eq!(rev.revision_number, 1);
        assert_eq!(rev.author_name.as_deref(), Some("Bisqwit"));
        assert!(rev.is_current);
        assert_eq!(cache.try_get("frontpage"), Some(rev));
    }

    #[tokio::test]
    async fn test_add_links_previous_tip() {
        let (pages, store, _, user) = setup().await;
        let r1 = add(&pages, "FrontPage", "one", user).await;
        let r2 = add(&pages, "frontpage", "two", user).await;
        assert_eq!(r2.revision_number, 2);
        assert_eq!(r2.page_name, "FrontPage");

        let rows = store.page_revisions("frontpage").await.unwrap();
        assert_eq!(rows[0].id, r1.id);
        assert_eq!(rows[0].next_id, Some(r2.id));
        assert_eq!(rows[0].state(), RevisionState::Historical);
        assert_eq!(rows[1].state(), RevisionState::Tip);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_author_and_blank_name() {
        let (pages, store, _, user) = setup().await;
        let err = pages.add(PageEdit::new("Page", "x", user + 7)).await.unwrap_err();
        assert!(matches!(err, WikiError::Integrity(_)));
        let err = pages.add(PageEdit::new("//", "x", user)).await.unwrap_err();
        assert!(matches!(err, WikiError::Integrity(_)));
        assert_eq!(store.revision_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_edit_conflict() {
        let (pages, store, cache, user) = setup().await;
        let r1 = add(&pages, "Rules", "[Old]", user).await;
        assert!(cache.try_get("rules").is_some());

        let stale = PageEdit::new("Rules", "[New]", user)
            .started_at(r1.create_timestamp - Duration::seconds(1));
        assert!(pages.add(stale).await.unwrap().is_none());
        assert!(cache.try_get("rules").is_none());

        assert_eq!(store.revision_count().await, 1);
        assert_eq!(pages.page("Rules", None).await.unwrap().unwrap().id, r1.id);
        let refs = pages.outbound_referrals("Rules").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].referral, "Old");
    }

    #[tokio::test]
    async fn test_add_after_deleted_tail_skips_numbers() {
        let (pages, store, _, user) = setup().await;
        add(&pages, "Page", "1", user).await;
        add(&pages, "Page", "2", user).await;
        assert!(pages.delete_revision("Page", 2).await.unwrap());

        let r3 = add(&pages, "Page", "3", user).await;
        assert_eq!(r3.revision_number, 3);
        let rows = store.page_revisions("page").await.unwrap();
        assert_eq!(rows[0].next_id, Some(r3.id));
        // the deleted revision stays dangling
        assert_eq!(rows[1].state(), RevisionState::Tombstone);
        assert_eq!(rows[1].next_id, None);
    }

    #[tokio::test]
    async fn test_page_reads_through_cache() {
        let (pages, _, cache, user) = setup().await;
        add(&pages, "Page", "text", user).await;
        cache.evict("page");

        assert!(pages.page("PAGE", None).await.unwrap().is_some());
        assert!(cache.try_get("page").is_some());

        assert!(pages.page("Missing", None).await.unwrap().is_none());
        assert!(cache.try_get("missing").is_none());
    }

    #[tokio::test]
    async fn test_page_historical_bypasses_cache() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "Page", "first", user).await;
        add(&pages, "Page", "second", user).await;
        let old = pages.page("Page", Some(1)).await.unwrap().unwrap();
        assert_eq!(old.markup, "first");
        assert!(!old.is_current);
        assert!(pages.page("Page", Some(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "Page", "x", user).await;
        assert!(pages.exists("page", false).await.unwrap());
        pages.delete_page("Page").await.unwrap();
        assert!(!pages.exists("Page", false).await.unwrap());
        assert!(pages.exists("Page", true).await.unwrap());
        assert!(!pages.exists("Other", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_page() {
        let (pages, store, cache, user) = setup().await;
        add(&pages, "Page", "[Target]", user).await;
        add(&pages, "Page", "[Target] again", user).await;

        assert_eq!(pages.delete_page("Page").await.unwrap(), Some(2));
        let rows = store.page_revisions("page").await.unwrap();
        assert!(rows.iter().all(|r| r.is_deleted && r.next_id.is_none()));
        assert!(cache.try_get("page").is_none());
        assert!(pages.outbound_referrals("Page").await.unwrap().is_empty());

        assert_eq!(pages.delete_page("Nothing").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_delete_current_revision_promotes_previous() {
        let (pages, store, cache, user) = setup().await;
        let r1 = add(&pages, "Page", "[A]", user).await;
        add(&pages, "Page", "[B]", user).await;

        assert!(pages.delete_revision("Page", 2).await.unwrap());
        let current = pages.page("Page", None).await.unwrap().unwrap();
        assert_eq!(current.id, r1.id);
        assert_eq!(cache.try_get("page").unwrap().id, r1.id);

        let rows = store.page_revisions("page").await.unwrap();
        assert_eq!(rows[0].next_id, None);
        let refs = pages.outbound_referrals("Page").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].referral, "A");
    }

    #[tokio::test]
    async fn test_delete_historical_revision_leaves_current() {
        let (pages, _, cache, user) = setup().await;
        add(&pages, "Page", "[A]", user).await;
        let r2 = add(&pages, "Page", "[B]", user).await;

        assert!(pages.delete_revision("Page", 1).await.unwrap());
        assert_eq!(cache.try_get("page").unwrap().id, r2.id);
        assert_eq!(pages.outbound_referrals("Page").await.unwrap()[0].referral, "B");
        assert!(pages.page("Page", Some(1)).await.unwrap().unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_delete_revision_noops() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "Page", "x", user).await;
        assert!(pages.delete_revision("Page", 5).await.unwrap());
        assert!(pages.delete_revision("Missing", 1).await.unwrap());
        assert!(pages.delete_revision("Page", 1).await.unwrap());
        assert!(pages.delete_revision("Page", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_last_revision_then_undelete() {
        let (pages, _, cache, user) = setup().await;
        let r1 = add(&pages, "Solo", "[Friend]", user).await;

        assert!(pages.delete_revision("Solo", 1).await.unwrap());
        assert!(pages.page("Solo", None).await.unwrap().is_none());
        assert!(cache.try_get("solo").is_none());
        assert!(pages.outbound_referrals("Solo").await.unwrap().is_empty());

        assert!(pages.undelete("Solo").await.unwrap());
        let current = pages.page("Solo", None).await.unwrap().unwrap();
        assert_eq!(current.id, r1.id);
        assert!(!current.is_deleted);
        assert_eq!(pages.outbound_referrals("Solo").await.unwrap()[0].referral, "Friend");
    }

    #[tokio::test]
    async fn test_undelete_relinks_chain() {
        let (pages, store, _, user) = setup().await;
        let r1 = add(&pages, "Page", "1", user).await;
        let r2 = add(&pages, "Page", "2", user).await;
        let r3 = add(&pages, "Page", "3", user).await;
        pages.delete_page("Page").await.unwrap();

        assert!(pages.undelete("Page").await.unwrap());
        let rows = store.page_revisions("page").await.unwrap();
        assert_eq!(rows[0].next_id, Some(r2.id));
        assert_eq!(rows[1].next_id, Some(r3.id));
        assert_eq!(rows[2].next_id, None);
        assert!(rows.iter().all(|r| !r.is_deleted));
        assert_eq!(pages.page("Page", None).await.unwrap().unwrap().id, r3.id);
        assert_ne!(r1.id, r3.id);
    }

    #[tokio::test]
    async fn test_undelete_is_noop_with_live_tip() {
        let (pages, store, _, user) = setup().await;
        add(&pages, "Page", "1", user).await;
        add(&pages, "Page", "2", user).await;
        pages.delete_revision("Page", 2).await.unwrap();

        assert!(pages.undelete("Page").await.unwrap());
        assert!(pages.undelete("Missing").await.unwrap());
        let rows = store.page_revisions("page").await.unwrap();
        assert!(rows[1].is_deleted);
    }

    #[tokio::test]
    async fn test_move_page() {
        let (pages, store, cache, user) = setup().await;
        add(&pages, "Old", "[Target]", user).await;
        add(&pages, "Old", "[Target] v2", user).await;
        pages.page("Old", None).await.unwrap();

        assert!(pages.move_page("/Old/", "/New/").await.unwrap());
        assert!(store.page_revisions("old").await.unwrap().is_empty());
        let rows = store.page_revisions("new").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.page_name == "New"));
        assert!(cache.try_get("old").is_none());
        assert_eq!(cache.try_get("new").unwrap().page_name, "New");
        assert_eq!(pages.referrers("Target").await.unwrap()[0].referrer, "New");
    }

    #[tokio::test]
    async fn test_move_page_onto_existing_page_fails() {
        let (pages, store, _, user) = setup().await;
        add(&pages, "A", "a", user).await;
        add(&pages, "B", "b", user).await;

        let err = pages.move_page("A", "b").await.unwrap_err();
        assert!(matches!(err, WikiError::DestinationExists(_)));
        assert_eq!(store.page_revisions("a").await.unwrap()[0].page_name, "A");
        assert_eq!(pages.page("A", None).await.unwrap().unwrap().markup, "a");
    }

    #[tokio::test]
    async fn test_move_page_edge_cases() {
        let (pages, store, _, user) = setup().await;
        assert!(matches!(
            pages.move_page("A", "  ").await.unwrap_err(),
            WikiError::Integrity(_)
        ));
        assert!(pages.move_page("Missing", "Elsewhere").await.unwrap());

        add(&pages, "lowercase", "x", user).await;
        assert!(pages.move_page("lowercase", "LowerCase").await.unwrap());
        assert_eq!(store.page_revisions("lowercase").await.unwrap()[0].page_name, "LowerCase");
    }

    #[tokio::test]
    async fn test_move_all_rewrites_prefix() {
        let (pages, store, cache, user) = setup().await;
        add(&pages, "HomePages/Old", "home", user).await;
        add(&pages, "HomePages/Old/Notes", "notes", user).await;
        add(&pages, "HomePages/Older", "other user", user).await;

        assert!(pages.move_all("HomePages/Old", "HomePages/New").await.unwrap());
        assert_eq!(
            store.page_revisions("homepages/new/notes").await.unwrap()[0].page_name,
            "HomePages/New/Notes"
        );
        assert!(!store.page_revisions("homepages/new").await.unwrap().is_empty());
        assert!(!store.page_revisions("homepages/older").await.unwrap().is_empty());
        assert!(cache.try_get("homepages/old/notes").is_none());
        assert_eq!(pages.sub_pages("HomePages/New").await.unwrap(), vec!["HomePages/New/Notes"]);
    }

    #[tokio::test]
    async fn test_move_all_destination_taken() {
        let (pages, store, _, user) = setup().await;
        add(&pages, "A", "a", user).await;
        add(&pages, "A/Child", "c", user).await;
        add(&pages, "B/Child", "taken", user).await;

        let err = pages.move_all("A", "B").await.unwrap_err();
        assert!(matches!(err, WikiError::DestinationExists(_)));
        assert_eq!(store.page_revisions("a/child").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_orphans_example() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "Parent", "", user).await;
        add(&pages, "Parent/Child", "", user).await;
        let orphans: Vec<String> = pages
            .orphans()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.page_name)
            .collect();
        assert_eq!(orphans, vec!["Parent"]);

        add(&pages, "Index", "[Parent]", user).await;
        let orphans: Vec<String> = pages
            .orphans()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.page_name)
            .collect();
        assert_eq!(orphans, vec!["Index"]);
    }

    #[tokio::test]
    async fn test_broken_links_example() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "X", "[Y]", user).await;
        let broken = pages.broken_links().await.unwrap();
        assert_eq!(broken.len(), 1);
        assert_eq!((broken[0].referrer.as_str(), broken[0].referral.as_str()), ("X", "Y"));

        add(&pages, "Y", "", user).await;
        assert!(pages.broken_links().await.unwrap().is_empty());

        add(&pages, "SandBox", "[Nowhere] [Subs-123]", user).await;
        add(&pages, "Z", "[Movies-NES]", user).await;
        assert!(pages.broken_links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_marks_current_and_tombstones() {
        let (pages, _, _, user) = setup().await;
        add(&pages, "Page", "1", user).await;
        add(&pages, "Page", "2", user).await;
        add(&pages, "Page", "3", user).await;
        pages.delete_revision("Page", 3).await.unwrap();

        let history = pages.history("Page").await.unwrap();
        let flags: Vec<(u32, bool, bool)> = history
            .iter()
            .map(|r| (r.revision_number, r.is_current, r.is_deleted))
            .collect();
        assert_eq!(flags, vec![(1, false, false), (2, true, false), (3, false, true)]);
    }
}
