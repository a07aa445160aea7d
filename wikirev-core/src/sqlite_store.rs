//! SQLite-backed revision store
//!
//! Revisions, users and referrals live in one SQLite database in WAL mode.
//! Each batch runs in an IMMEDIATE transaction; the page guards are checked
//! inside it and any failure rolls the whole batch back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::model::{page_key, Referral, RevisionId, RevisionRow, UserId};
use crate::storage::{
    parked_key, referral_key, ReferralWrite, Result, RevisionStore, StorageError, Successor,
    UserDirectory, WriteBatch,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS revisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_name TEXT NOT NULL,
    page_key TEXT NOT NULL,
    revision_number INTEGER NOT NULL,
    markup TEXT NOT NULL,
    author_id INTEGER NOT NULL REFERENCES users(id),
    create_timestamp INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    next_id INTEGER REFERENCES revisions(id),
    minor_edit INTEGER NOT NULL DEFAULT 0,
    revision_message TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (page_key, revision_number)
);
CREATE INDEX IF NOT EXISTS idx_revisions_live ON revisions (is_deleted, page_key);
CREATE TABLE IF NOT EXISTS referrals (
    referrer TEXT NOT NULL,
    referrer_key TEXT NOT NULL,
    referral TEXT NOT NULL,
    referral_key TEXT NOT NULL,
    excerpt TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals (referrer_key);
CREATE INDEX IF NOT EXISTS idx_referrals_referral ON referrals (referral_key);
";

const REVISION_COLUMNS: &str = "r.id, r.page_name, r.revision_number, r.markup, r.author_id, u.name, \
     r.create_timestamp, r.is_deleted, r.next_id, r.minor_edit, r.revision_message, r.version \
     FROM revisions r LEFT JOIN users u ON u.id = r.author_id";

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StorageError::Conflict(err.to_string());
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                    return StorageError::Integrity(err.to_string());
                }
                _ => {}
            }
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return StorageError::Conflict(err.to_string());
            }
        }
        StorageError::Database(err.to_string())
    }
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn timestamp_to_i64(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn i64_to_timestamp(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn row_to_revision(row: &Row<'_>) -> rusqlite::Result<RevisionRow> {
    Ok(RevisionRow {
        id: row.get(0)?,
        page_name: row.get(1)?,
        revision_number: row.get(2)?,
        markup: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        create_timestamp: i64_to_timestamp(row.get(6)?),
        is_deleted: row.get(7)?,
        next_id: row.get(8)?,
        minor_edit: row.get(9)?,
        revision_message: row.get(10)?,
        version: row.get::<_, i64>(11)? as u64,
    })
}

fn row_to_referral(row: &Row<'_>) -> rusqlite::Result<Referral> {
    Ok(Referral {
        referrer: row.get(0)?,
        referral: row.get(1)?,
        excerpt: row.get(2)?,
    })
}

fn conn_query_revisions<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> Result<Vec<RevisionRow>> {
    let sql = format!("SELECT {} {}", REVISION_COLUMNS, clause);
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params, row_to_revision)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn conn_query_referrals<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> Result<Vec<Referral>> {
    let sql = format!("SELECT referrer, referral, excerpt FROM referrals {}", clause);
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params, row_to_referral)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn conn_page_tokens(conn: &Connection, key: &str) -> Result<Vec<(RevisionId, u64)>> {
    let mut stmt = conn.prepare_cached("SELECT id, version FROM revisions WHERE page_key = ?1")?;
    let mut observed = stmt
        .query_map(params![key], |row| {
            Ok((row.get::<_, RevisionId>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    observed.sort_unstable();
    Ok(observed)
}

fn conn_insert_referrals(
    conn: &Connection,
    referrer: &str,
    links: &[crate::model::ExtractedLink],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO referrals (referrer, referrer_key, referral, referral_key, excerpt) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let referrer_key = page_key(referrer);
    for link in links {
        stmt.execute(params![
            referrer,
            referrer_key,
            link.target,
            referral_key(&link.target),
            link.excerpt
        ])?;
    }
    Ok(())
}

/// SQLite-backed revision store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = open_db(path)?;
        tracing::debug!("Opened wiki database at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }

    /// Register a user and return its id
    pub async fn add_user(&self, name: &str) -> Result<UserId> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO users (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of revision rows, deleted ones included
    pub async fn revision_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM revisions", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn user_name(&self, id: UserId) -> Result<Option<String>> {
        let name = self
            .conn()?
            .query_row("SELECT name FROM users WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(name)
    }
}

#[async_trait]
impl RevisionStore for SqliteStore {
    async fn page_revisions(&self, page_key: &str) -> Result<Vec<RevisionRow>> {
        conn_query_revisions(
            &*self.conn()?,
            "WHERE r.page_key = ?1 ORDER BY r.revision_number",
            params![page_key],
        )
    }

    async fn prefix_revisions(&self, prefix_key: &str) -> Result<Vec<RevisionRow>> {
        // substr avoids LIKE wildcards hiding inside page names
        let below = format!("{}/", prefix_key);
        conn_query_revisions(
            &*self.conn()?,
            "WHERE r.page_key = ?1 OR substr(r.page_key, 1, length(?2)) = ?2 \
             ORDER BY r.page_key, r.revision_number",
            params![prefix_key, below],
        )
    }

    async fn live_revisions(&self) -> Result<Vec<RevisionRow>> {
        conn_query_revisions(&*self.conn()?, "WHERE r.is_deleted = 0 ORDER BY r.id", [])
    }

    async fn referrals(&self) -> Result<Vec<Referral>> {
        conn_query_referrals(&*self.conn()?, "ORDER BY rowid", [])
    }

    async fn referrals_from(&self, referrer_key: &str) -> Result<Vec<Referral>> {
        conn_query_referrals(
            &*self.conn()?,
            "WHERE referrer_key = ?1 ORDER BY rowid",
            params![referrer_key],
        )
    }

    async fn referrals_to(&self, target_key: &str) -> Result<Vec<Referral>> {
        conn_query_referrals(
            &*self.conn()?,
            "WHERE referral_key = ?1 ORDER BY rowid",
            params![target_key],
        )
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Option<RevisionId>> {
        let mut conn = self.conn()?;
        // Dropping the transaction on any early return rolls it back
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for guard in &batch.guards {
            if conn_page_tokens(&tx, &guard.page_key)? != guard.observed {
                return Err(StorageError::Conflict(format!(
                    "page '{}' changed since it was read",
                    guard.page_key
                )));
            }
        }

        let inserted = match &batch.insert {
            Some(new) => {
                tx.execute(
                    "INSERT INTO revisions (page_name, page_key, revision_number, markup, author_id, \
                     create_timestamp, minor_edit, revision_message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        new.page_name,
                        page_key(&new.page_name),
                        new.revision_number,
                        new.markup,
                        new.author_id,
                        timestamp_to_i64(&new.create_timestamp),
                        new.minor_edit,
                        new.revision_message
                    ],
                )?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        // UNIQUE (page_key, revision_number) is checked per statement, so
        // renamed rows are parked on a per-row key before taking their new names
        for update in batch.updates.iter().filter(|u| u.page_name.is_some()) {
            tx.execute(
                "UPDATE revisions SET page_key = char(0) || id WHERE id = ?1",
                params![update.id],
            )?;
        }

        for update in &batch.updates {
            let next_id = match update.next {
                Successor::None => None,
                Successor::Revision(id) => Some(id),
                Successor::Inserted => inserted,
            };
            let renamed_key = update.page_name.as_deref().map(page_key);
            let changed = tx.execute(
                "UPDATE revisions SET is_deleted = ?1, next_id = ?2, \
                 page_name = COALESCE(?3, page_name), page_key = COALESCE(?4, page_key), \
                 version = version + 1 WHERE id = ?5",
                params![update.is_deleted, next_id, update.page_name, renamed_key, update.id],
            )?;
            if changed == 0 {
                return Err(StorageError::Conflict(format!(
                    "revision {} no longer exists",
                    update.id
                )));
            }
        }

        for write in &batch.referrals {
            if let ReferralWrite::Rename { from_key, .. } = write {
                tx.execute(
                    "UPDATE referrals SET referrer_key = ?1 WHERE referrer_key = ?2",
                    params![parked_key(from_key), from_key],
                )?;
            }
        }

        for write in &batch.referrals {
            match write {
                ReferralWrite::Replace { referrer, links } => {
                    tx.execute(
                        "DELETE FROM referrals WHERE referrer_key = ?1",
                        params![page_key(referrer)],
                    )?;
                    conn_insert_referrals(&tx, referrer, links)?;
                }
                ReferralWrite::Clear { referrer_key } => {
                    tx.execute(
                        "DELETE FROM referrals WHERE referrer_key = ?1",
                        params![referrer_key],
                    )?;
                }
                ReferralWrite::Rename { from_key, to } => {
                    tx.execute(
                        "UPDATE referrals SET referrer = ?1, referrer_key = ?2 WHERE referrer_key = ?3",
                        params![to, page_key(to), parked_key(from_key)],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }
}
