//! Shared fixtures for the wiki integration tests
#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use wikirev_core::{
    BracketLinkExtractor, LruPageCache, MemoryStore, PageEdit, Revision, RevisionStore,
    SqliteStore, UserId, WikiConfig, WikiPages,
};

/// A wiki over one backend, with its cache exposed for inspection
pub struct Wiki {
    pub pages: WikiPages,
    pub store: Arc<dyn RevisionStore>,
    pub cache: Arc<LruPageCache>,
    pub author: UserId,
    _dir: Option<TempDir>,
}

impl Wiki {
    pub async fn add(&self, page: &str, markup: &str) -> Revision {
        self.pages
            .add(PageEdit::new(page, markup, self.author))
            .await
            .unwrap()
            .expect("edit should not conflict")
    }

    /// Names of the orphaned pages
    pub async fn orphan_names(&self) -> Vec<String> {
        self.pages
            .orphans()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.page_name)
            .collect()
    }
}

pub async fn memory_wiki() -> Wiki {
    let store = Arc::new(MemoryStore::new());
    let author = store.add_user("adelikat").await.unwrap();
    let cache = Arc::new(LruPageCache::new(128));
    let pages = WikiPages::new(
        store.clone(),
        store.clone(),
        Arc::new(BracketLinkExtractor::new()),
        cache.clone(),
        WikiConfig::default(),
    );
    Wiki {
        pages,
        store,
        cache,
        author,
        _dir: None,
    }
}

pub async fn sqlite_wiki() -> Wiki {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("wiki.db")).unwrap());
    let author = store.add_user("adelikat").await.unwrap();
    let cache = Arc::new(LruPageCache::new(128));
    let pages = WikiPages::new(
        store.clone(),
        store.clone(),
        Arc::new(BracketLinkExtractor::new()),
        cache.clone(),
        WikiConfig::default(),
    );
    Wiki {
        pages,
        store,
        cache,
        author,
        _dir: Some(dir),
    }
}

/// One wiki per backend, labelled for assertion messages
pub async fn wikis() -> Vec<(&'static str, Wiki)> {
    vec![("memory", memory_wiki().await), ("sqlite", sqlite_wiki().await)]
}
