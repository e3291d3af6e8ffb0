//! SQLite database layer for clipboard history
//!
//! Single `clip_items` table keyed by `id`, plus a `settings` key/value table.
//! Uses r2d2 connection pooling so readers never wait on each other; WAL mode
//! gives every statement a consistent snapshot while a writer is active.
//!
//! Dedup identity is enforced by a partial unique index on `content_hash`
//! restricted to unpinned rows, so a pinned row can share content with a live one.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, warn};

use crate::interface::{CaptureOutcome, CaptureStatus, ClipItem, ClipKind, ClipPayload, StorageInfo};
use crate::models::NewClip;
use crate::query::HistoryQuery;
use crate::retention::RetentionPolicy;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("Constraint violated: {0}")]
    Constraint(String),
    #[error("Query interrupted")]
    Interrupted,
    #[error("Item {0} not found")]
    NotFound(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            match err.code {
                rusqlite::ffi::ErrorCode::ConstraintViolation => {
                    return DatabaseError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()));
                }
                rusqlite::ffi::ErrorCode::OperationInterrupted => return DatabaseError::Interrupted,
                _ => {}
            }
        }
        DatabaseError::Sqlite(e)
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Settings key for a persisted retention cap
pub(crate) const MAX_UNPINNED_SETTING: &str = "max_unpinned_items";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const ITEM_COLUMNS: &str =
    "id, content_hash, kind, payload, preview, created_at, last_seen_at, pinned, pin_order, byte_size";

/// Fixed-width timestamp text; sorts lexicographically in time order
pub(crate) fn format_db_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse timestamp string from database to DateTime<Utc>
fn parse_db_timestamp(timestamp_str: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok()
}

fn encode_payload(payload: &ClipPayload) -> DatabaseResult<Vec<u8>> {
    Ok(match payload {
        ClipPayload::Text(text) => text.as_bytes().to_vec(),
        ClipPayload::Image(bytes) => bytes.clone(),
        ClipPayload::FileList(paths) => serde_json::to_vec(paths)?,
    })
}

fn decode_payload(kind: ClipKind, bytes: Vec<u8>) -> Option<ClipPayload> {
    match kind {
        ClipKind::Text => String::from_utf8(bytes).ok().map(ClipPayload::Text),
        ClipKind::Image => Some(ClipPayload::Image(bytes)),
        ClipKind::FileList => serde_json::from_slice(&bytes).ok().map(ClipPayload::FileList),
    }
}

/// Thread-safe database wrapper using connection pooling
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                PRAGMA cache_size=-16000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (tests, dry runs)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
            ",
            )?;
            Ok(())
        });

        // In-memory needs single connection to maintain state
        let pool = Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clip_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                preview TEXT NOT NULL,
                search_text TEXT NOT NULL,
                byte_size INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                pin_order INTEGER
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_clip_items_live_hash
                ON clip_items(content_hash) WHERE pinned = 0;
            CREATE INDEX IF NOT EXISTS idx_clip_items_hash ON clip_items(content_hash);
            CREATE INDEX IF NOT EXISTS idx_clip_items_recency ON clip_items(pinned, last_seen_at);
            CREATE INDEX IF NOT EXISTS idx_clip_items_pin_order ON clip_items(pinned, pin_order, created_at);
            CREATE INDEX IF NOT EXISTS idx_clip_items_created ON clip_items(created_at);
        "#,
        )?;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    /// Get the database size in bytes
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        Self::database_size_on(&conn)
    }

    fn database_size_on(conn: &Connection) -> DatabaseResult<i64> {
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// Get total number of items in the database
    pub fn count_items(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clip_items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_unpinned(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        Ok(Self::count_unpinned_on(&conn)?)
    }

    pub(crate) fn count_unpinned_on(conn: &Connection) -> rusqlite::Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM clip_items WHERE pinned = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Fetch a single item by id
    pub fn get_item(&self, id: i64) -> DatabaseResult<Option<ClipItem>> {
        let conn = self.get_conn()?;
        Self::fetch_item(&conn, id)
    }

    fn fetch_item(conn: &Connection, id: i64) -> DatabaseResult<Option<ClipItem>> {
        let sql = format!("SELECT {} FROM clip_items WHERE id = ?1", ITEM_COLUMNS);
        let item = conn
            .query_row(&sql, [id], Self::row_to_item)
            .optional()?
            .flatten();
        Ok(item)
    }

    /// Run a history query. Rows that fail to decode are left out.
    pub fn query(&self, query: &HistoryQuery) -> DatabaseResult<Vec<ClipItem>> {
        if query.is_empty_range() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        Self::run_query(&conn, query)
    }

    /// Run a history query with SQLite C-level interrupt support.
    pub fn query_interruptible(
        &self,
        query: &HistoryQuery,
        token: &tokio_util::sync::CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> DatabaseResult<Vec<ClipItem>> {
        use tokio_util::task::AbortOnDropHandle;

        if token.is_cancelled() {
            return Err(DatabaseError::Interrupted);
        }
        if query.is_empty_range() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let interrupt_handle = conn.get_interrupt_handle();

        let token_clone = token.clone();
        let watcher = runtime.spawn(async move {
            token_clone.cancelled().await;
            interrupt_handle.interrupt();
        });
        let _abort_guard = AbortOnDropHandle::new(watcher);

        Self::run_query(&conn, query)
    }

    fn run_query(conn: &Connection, query: &HistoryQuery) -> DatabaseResult<Vec<ClipItem>> {
        let (tail, params) = query.to_sql();
        let sql = format!("SELECT {} FROM clip_items{}", ITEM_COLUMNS, tail);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), Self::row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            if let Some(item) = row? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Counts, sizes and kind distribution, read in one snapshot
    pub fn storage_info(&self) -> DatabaseResult<StorageInfo> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let (item_count, pinned_count, total_bytes): (i64, i64, i64) = tx.query_row(
            "SELECT COUNT(*), COALESCE(SUM(pinned), 0), COALESCE(SUM(byte_size), 0) FROM clip_items",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut kind_counts = BTreeMap::new();
        {
            let mut stmt = tx.prepare("SELECT kind, COUNT(*) FROM clip_items GROUP BY kind")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (kind, count) = row?;
                if let Some(kind) = ClipKind::from_database(&kind) {
                    kind_counts.insert(kind, count as u64);
                }
            }
        }

        let database_bytes = Self::database_size_on(&tx)?;
        tx.commit()?;

        Ok(StorageInfo {
            item_count: item_count as u64,
            pinned_count: pinned_count as u64,
            unpinned_count: (item_count - pinned_count) as u64,
            total_bytes: total_bytes as u64,
            kind_counts,
            database_bytes: database_bytes as u64,
            max_unpinned_items: 0,
        })
    }

    pub fn get_setting(&self, key: &str) -> DatabaseResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record a capture. An unpinned row with the same hash gets its
    /// `last_seen_at` refreshed; otherwise a new row is inserted and the
    /// retention policy runs in the same transaction.
    pub fn insert_or_touch(
        &self,
        clip: &NewClip,
        now: DateTime<Utc>,
        retention: &RetentionPolicy,
    ) -> DatabaseResult<CaptureOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now_str = format_db_timestamp(now);

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM clip_items WHERE content_hash = ?1 AND pinned = 0",
                [&clip.content_hash],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            tx.execute(
                "UPDATE clip_items SET last_seen_at = ?1 WHERE id = ?2",
                params![now_str, id],
            )?;
            let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
            tx.commit()?;
            return Ok(CaptureOutcome {
                item,
                status: CaptureStatus::Touched,
                evicted: Vec::new(),
            });
        }

        let payload = encode_payload(&clip.payload)?;
        tx.execute(
            r#"INSERT INTO clip_items (content_hash, kind, payload, preview, search_text, byte_size, created_at, last_seen_at, pinned, pin_order)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0, NULL)"#,
            params![
                clip.content_hash,
                clip.kind().database_type(),
                payload,
                clip.preview,
                clip.search_text,
                clip.byte_size as i64,
                now_str,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let evicted = retention.enforce(&tx, Some(id))?;
        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        tx.commit()?;

        Ok(CaptureOutcome {
            item,
            status: CaptureStatus::Inserted,
            evicted,
        })
    }

    /// Refresh `last_seen_at` on any row, pinned or not
    pub fn touch(&self, id: i64, now: DateTime<Utc>) -> DatabaseResult<ClipItem> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE clip_items SET last_seen_at = ?1 WHERE id = ?2",
            params![format_db_timestamp(now), id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        tx.commit()?;
        Ok(item)
    }

    /// Pin a row. The row is frozen as-is; a live row with the same content is left alone.
    pub fn pin(&self, id: i64) -> DatabaseResult<ClipItem> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        if item.pinned {
            return Ok(item);
        }

        let next_order: i64 = tx.query_row(
            "SELECT COALESCE(MAX(pin_order), 0) + 1 FROM clip_items WHERE pinned = 1",
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE clip_items SET pinned = 1, pin_order = ?1 WHERE id = ?2",
            params![next_order, id],
        )?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        tx.commit()?;
        Ok(item)
    }

    /// Unpin a row. If a live row already carries the same content it is folded
    /// into this one so live hashes stay unique.
    pub fn unpin(&self, id: i64) -> DatabaseResult<ClipItem> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        if !item.pinned {
            return Ok(item);
        }

        let twin: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, last_seen_at FROM clip_items WHERE content_hash = ?1 AND pinned = 0",
                [&item.content_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let mut last_seen = item.last_seen_at;
        if let Some((twin_id, twin_seen)) = twin {
            if let Some(twin_seen) = parse_db_timestamp(&twin_seen) {
                last_seen = last_seen.max(twin_seen);
            }
            tx.execute("DELETE FROM clip_items WHERE id = ?1", [twin_id])?;
            debug!(item_id = id, merged_id = twin_id, "Folded live duplicate into unpinned item");
        }

        tx.execute(
            "UPDATE clip_items SET pinned = 0, pin_order = NULL, last_seen_at = ?1 WHERE id = ?2",
            params![format_db_timestamp(last_seen), id],
        )?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        tx.commit()?;
        Ok(item)
    }

    /// Move a pinned row to an explicit position among pinned rows
    pub fn set_pin_order(&self, id: i64, order: i64) -> DatabaseResult<ClipItem> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        if !item.pinned {
            return Err(DatabaseError::InvalidInput(format!("item {} is not pinned", id)));
        }
        tx.execute(
            "UPDATE clip_items SET pin_order = ?1 WHERE id = ?2",
            params![order, id],
        )?;

        let item = Self::fetch_item(&tx, id)?.ok_or(DatabaseError::NotFound(id))?;
        tx.commit()?;
        Ok(item)
    }

    /// Delete an item by ID, pinned or not
    pub fn delete_item(&self, id: i64) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM clip_items WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        Ok(())
    }

    /// Delete all items, optionally keeping pinned ones. Returns rows deleted.
    pub fn clear(&self, include_pinned: bool) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let deleted = if include_pinned {
            conn.execute("DELETE FROM clip_items", [])?
        } else {
            conn.execute("DELETE FROM clip_items WHERE pinned = 0", [])?
        };
        Ok(deleted as u64)
    }

    /// Persist a new retention cap and enforce it immediately
    pub fn apply_retention_cap(&self, retention: &RetentionPolicy) -> DatabaseResult<Vec<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![MAX_UNPINNED_SETTING, retention.max_unpinned_items().to_string()],
        )?;
        let evicted = retention.enforce(&tx, None)?;
        tx.commit()?;
        Ok(evicted)
    }

    /// Convert a database row to a ClipItem.
    /// Rows with an unknown kind or an undecodable payload yield None.
    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Option<ClipItem>> {
        let id: i64 = row.get(0)?;
        let content_hash: String = row.get(1)?;
        let kind_str: String = row.get(2)?;
        let payload_bytes: Vec<u8> = row.get(3)?;
        let preview: String = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        let last_seen_at_str: String = row.get(6)?;
        let pinned: bool = row.get(7)?;
        let pin_order: Option<i64> = row.get(8)?;
        let byte_size: i64 = row.get(9)?;

        let Some(kind) = ClipKind::from_database(&kind_str) else {
            warn!(item_id = id, kind = %kind_str, "Skipping row with unknown kind");
            return Ok(None);
        };
        let Some(payload) = decode_payload(kind, payload_bytes) else {
            warn!(item_id = id, kind = %kind_str, "Skipping row with undecodable payload");
            return Ok(None);
        };
        let (Some(created_at), Some(last_seen_at)) = (
            parse_db_timestamp(&created_at_str),
            parse_db_timestamp(&last_seen_at_str),
        ) else {
            warn!(item_id = id, "Skipping row with unparseable timestamps");
            return Ok(None);
        };

        Ok(Some(ClipItem {
            id,
            content_hash,
            payload,
            preview,
            created_at,
            last_seen_at,
            pinned,
            pin_order,
            byte_size: byte_size.max(0) as u64,
        }))
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> DatabaseResult<usize> {
        let conn = self.get_conn()?;
        Ok(conn.execute(sql, [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ListOrder;
    use crate::models::NormalizeOptions;
    use chrono::Duration;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn text(s: &str) -> NewClip {
        NewClip::new_text(s.to_string(), &NormalizeOptions::default()).unwrap()
    }

    fn policy(max: usize) -> RetentionPolicy {
        RetentionPolicy::new(max).unwrap()
    }

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = base_time() + Duration::milliseconds(42);
        let formatted = format_db_timestamp(ts);
        assert_eq!(formatted, "2024-05-01 09:00:00.042");
        assert_eq!(parse_db_timestamp(&formatted), Some(ts));
        assert_eq!(parse_db_timestamp("2024-05-01 09:00:00"), Some(base_time()));
        assert_eq!(parse_db_timestamp("yesterday"), None);
    }

    #[test]
    fn test_insert_then_touch() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_or_touch(&text("hello"), base_time(), &policy(10)).unwrap();
        assert_eq!(first.status, CaptureStatus::Inserted);
        assert_eq!(first.item.created_at, base_time());

        let later = base_time() + Duration::seconds(30);
        let second = db.insert_or_touch(&text("hello"), later, &policy(10)).unwrap();
        assert_eq!(second.status, CaptureStatus::Touched);
        assert_eq!(second.item.id, first.item.id);
        assert_eq!(second.item.created_at, base_time());
        assert_eq!(second.item.last_seen_at, later);
        assert_eq!(db.count_items().unwrap(), 1);
    }

    #[test]
    fn test_unique_index_rejects_live_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let outcome = db.insert_or_touch(&text("dup"), base_time(), &policy(10)).unwrap();

        let sql = format!(
            "INSERT INTO clip_items (content_hash, kind, payload, preview, search_text, created_at, last_seen_at) \
             VALUES ('{}', 'text', X'00', 'dup', 'dup', '2024-05-01 09:00:00.000', '2024-05-01 09:00:00.000')",
            outcome.item.content_hash
        );
        let err = db.execute_raw(&sql).unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {:?}", err);
    }

    #[test]
    fn test_pin_assigns_increasing_order() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_or_touch(&text("a"), base_time(), &policy(10)).unwrap().item;
        let b = db.insert_or_touch(&text("b"), base_time(), &policy(10)).unwrap().item;

        let pinned_b = db.pin(b.id).unwrap();
        let pinned_a = db.pin(a.id).unwrap();
        assert_eq!(pinned_b.pin_order, Some(1));
        assert_eq!(pinned_a.pin_order, Some(2));

        // Pinning twice keeps the original order
        assert_eq!(db.pin(b.id).unwrap().pin_order, Some(1));
    }

    #[test]
    fn test_unpin_folds_live_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let original = db.insert_or_touch(&text("same"), base_time(), &policy(10)).unwrap().item;
        db.pin(original.id).unwrap();

        let later = base_time() + Duration::minutes(5);
        let live = db.insert_or_touch(&text("same"), later, &policy(10)).unwrap();
        assert_eq!(live.status, CaptureStatus::Inserted);
        assert_eq!(db.count_items().unwrap(), 2);

        let released = db.unpin(original.id).unwrap();
        assert!(!released.pinned);
        assert_eq!(released.pin_order, None);
        assert_eq!(released.last_seen_at, later);
        assert_eq!(db.count_items().unwrap(), 1);
        assert!(db.get_item(live.item.id).unwrap().is_none());
    }

    #[test]
    fn test_missing_ids_are_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.pin(99), Err(DatabaseError::NotFound(99))));
        assert!(matches!(db.unpin(99), Err(DatabaseError::NotFound(99))));
        assert!(matches!(db.delete_item(99), Err(DatabaseError::NotFound(99))));
        assert!(matches!(db.touch(99, base_time()), Err(DatabaseError::NotFound(99))));
        assert!(matches!(db.set_pin_order(99, 1), Err(DatabaseError::NotFound(99))));
    }

    #[test]
    fn test_set_pin_order_requires_pinned_row() {
        let db = Database::open_in_memory().unwrap();
        let item = db.insert_or_touch(&text("loose"), base_time(), &policy(10)).unwrap().item;
        assert!(matches!(db.set_pin_order(item.id, 5), Err(DatabaseError::InvalidInput(_))));

        db.pin(item.id).unwrap();
        assert_eq!(db.set_pin_order(item.id, 5).unwrap().pin_order, Some(5));
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_or_touch(&text("good"), base_time(), &policy(10)).unwrap();
        db.execute_raw(
            "INSERT INTO clip_items (content_hash, kind, payload, preview, search_text, created_at, last_seen_at) \
             VALUES ('x', 'video', X'00', 'bad', 'bad', '2024-05-01 09:00:00.000', '2024-05-01 09:00:00.000')",
        )
        .unwrap();
        db.execute_raw(
            "INSERT INTO clip_items (content_hash, kind, payload, preview, search_text, created_at, last_seen_at) \
             VALUES ('y', 'file_list', X'7B7B', 'bad', 'bad', '2024-05-01 09:00:00.000', '2024-05-01 09:00:00.000')",
        )
        .unwrap();

        let items = db.query(&HistoryQuery::new().order(ListOrder::RecencyOnly)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload, ClipPayload::Text("good".into()));
        assert_eq!(db.count_items().unwrap(), 3);
    }

    #[test]
    fn test_file_list_payload_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let clip = NewClip::new_file_list(vec!["/tmp/b.txt".into(), "/tmp/a.txt".into()]).unwrap();
        let item = db.insert_or_touch(&clip, base_time(), &policy(10)).unwrap().item;

        let fetched = db.get_item(item.id).unwrap().unwrap();
        assert_eq!(
            fetched.payload,
            ClipPayload::FileList(vec!["/tmp/b.txt".into(), "/tmp/a.txt".into()])
        );
        assert_eq!(fetched.preview, "2 Files: b.txt, a.txt");
    }

    #[test]
    fn test_storage_info() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_or_touch(&text("abc"), base_time(), &policy(10)).unwrap().item;
        db.insert_or_touch(&text("de"), base_time(), &policy(10)).unwrap();
        db.insert_or_touch(&NewClip::new_image(vec![1, 2, 3, 4]).unwrap(), base_time(), &policy(10))
            .unwrap();
        db.pin(a.id).unwrap();

        let info = db.storage_info().unwrap();
        assert_eq!(info.item_count, 3);
        assert_eq!(info.pinned_count, 1);
        assert_eq!(info.unpinned_count, 2);
        assert_eq!(info.total_bytes, 3 + 2 + 4);
        assert_eq!(info.kind_counts.get(&ClipKind::Text), Some(&2));
        assert_eq!(info.kind_counts.get(&ClipKind::Image), Some(&1));
        assert!(info.database_bytes > 0);
    }

    #[test]
    fn test_clear_keeps_pinned_unless_asked() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_or_touch(&text("a"), base_time(), &policy(10)).unwrap().item;
        db.insert_or_touch(&text("b"), base_time(), &policy(10)).unwrap();
        db.pin(a.id).unwrap();

        assert_eq!(db.clear(false).unwrap(), 1);
        assert_eq!(db.count_items().unwrap(), 1);
        assert_eq!(db.clear(true).unwrap(), 1);
        assert_eq!(db.count_items().unwrap(), 0);
    }

    #[test]
    fn test_interruptible_query_with_cancelled_token() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.insert_or_touch(&text("a"), base_time(), &policy(10)).unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        let items = db.query_interruptible(&HistoryQuery::new(), &token, rt.handle()).unwrap();
        assert_eq!(items.len(), 1);

        token.cancel();
        let result = db.query_interruptible(&HistoryQuery::new(), &token, rt.handle());
        assert!(matches!(result, Err(DatabaseError::Interrupted)));
    }
}
