//! HistoryStore - durable clipboard history
//!
//! Wraps the SQLite layer with the rules that span calls: one writer at a time,
//! timestamps from an injectable clock, normalization options and the live
//! retention cap.
//!
//! Concurrency Model:
//! - Database uses r2d2 connection pool (concurrent reads, no mutex blocking)
//! - Mutations serialize on a writer mutex, bounded by `busy_wait_ms`
//! - Async queries run on spawn_blocking with a CancellationToken wired to
//!   SQLite's interrupt handle; dropping the future aborts the statement

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::database::{Database, MAX_UNPINNED_SETTING};
use crate::interface::{CaptureOutcome, CaptureStatus, ClipItem, ClipPayload, HistoryError, ListOrder, StorageInfo};
use crate::models::{NewClip, NormalizeOptions};
use crate::query::HistoryQuery;
use crate::retention::RetentionPolicy;

/// RAII guard that cancels a token when dropped.
/// Dropping an in-flight query future drops this guard, which interrupts the statement.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct HistoryStore {
    db: Arc<Database>,
    retention: RwLock<RetentionPolicy>,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
    normalize: NormalizeOptions,
    busy_wait: Duration,
}

impl HistoryStore {
    /// Open the store at the configured (or default) database path
    pub fn open(config: &HistoryConfig) -> Result<Self, HistoryError> {
        let path = config.resolved_database_path()?;
        Self::open_at(path, config)
    }

    pub fn open_at<P: AsRef<Path>>(path: P, config: &HistoryConfig) -> Result<Self, HistoryError> {
        config.validate()?;
        let path = path.as_ref();
        let db = Database::open(path)?;
        info!(path = %path.display(), "Opened history database");
        Self::from_database(db, config)
    }

    /// Create a store with an in-memory database
    pub fn open_in_memory(config: &HistoryConfig) -> Result<Self, HistoryError> {
        config.validate()?;
        let db = Database::open_in_memory()?;
        Self::from_database(db, config)
    }

    fn from_database(db: Database, config: &HistoryConfig) -> Result<Self, HistoryError> {
        let retention = match db.get_setting(MAX_UNPINNED_SETTING)? {
            Some(stored) => match stored.parse::<usize>().ok().filter(|n| *n > 0) {
                Some(n) => RetentionPolicy::new(n)?,
                None => {
                    warn!(value = %stored, "Ignoring invalid persisted retention cap");
                    RetentionPolicy::new(config.max_unpinned_items)?
                }
            },
            None => RetentionPolicy::new(config.max_unpinned_items)?,
        };

        Ok(Self {
            db: Arc::new(db),
            retention: RwLock::new(retention),
            writer: Mutex::new(()),
            clock: Arc::new(SystemClock),
            normalize: config.normalize_options(),
            busy_wait: config.busy_wait(),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        self.normalize
    }

    pub fn max_unpinned_items(&self) -> usize {
        self.retention.read().max_unpinned_items()
    }

    /// Hold the writer section, simulating a long-running writer
    #[cfg(test)]
    pub(crate) fn hold_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<usize, HistoryError> {
        Ok(self.db.execute_raw(sql)?)
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>, HistoryError> {
        self.writer.try_lock_for(self.busy_wait).ok_or(HistoryError::Busy)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record a normalized capture: refresh a matching unpinned row or insert a new one
    pub fn insert_or_touch(&self, clip: &NewClip) -> Result<CaptureOutcome, HistoryError> {
        let _guard = self.write_guard()?;
        let retention = *self.retention.read();
        let outcome = self.db.insert_or_touch(clip, self.now(), &retention)?;

        match outcome.status {
            CaptureStatus::Inserted => info!(
                item_id = outcome.item.id,
                kind = outcome.item.kind().database_type(),
                bytes = outcome.item.byte_size,
                evicted = outcome.evicted.len(),
                "Recorded clipboard item"
            ),
            CaptureStatus::Touched => debug!(item_id = outcome.item.id, "Refreshed existing clipboard item"),
        }
        Ok(outcome)
    }

    /// Normalize and record a raw payload. None when it normalizes to nothing.
    pub fn capture(&self, payload: ClipPayload) -> Result<Option<CaptureOutcome>, HistoryError> {
        match NewClip::from_payload(payload, &self.normalize) {
            Some(clip) => self.insert_or_touch(&clip).map(Some),
            None => Ok(None),
        }
    }

    /// Refresh `last_seen_at` on a row, pinned or not
    pub fn touch(&self, id: i64) -> Result<ClipItem, HistoryError> {
        let _guard = self.write_guard()?;
        Ok(self.db.touch(id, self.now())?)
    }

    pub fn pin(&self, id: i64) -> Result<ClipItem, HistoryError> {
        let _guard = self.write_guard()?;
        let item = self.db.pin(id)?;
        debug!(item_id = id, pin_order = ?item.pin_order, "Pinned item");
        Ok(item)
    }

    pub fn unpin(&self, id: i64) -> Result<ClipItem, HistoryError> {
        let _guard = self.write_guard()?;
        let item = self.db.unpin(id)?;
        debug!(item_id = id, "Unpinned item");
        Ok(item)
    }

    pub fn set_pin_order(&self, id: i64, order: i64) -> Result<ClipItem, HistoryError> {
        let _guard = self.write_guard()?;
        Ok(self.db.set_pin_order(id, order)?)
    }

    pub fn delete(&self, id: i64) -> Result<(), HistoryError> {
        let _guard = self.write_guard()?;
        self.db.delete_item(id)?;
        debug!(item_id = id, "Deleted item");
        Ok(())
    }

    /// Remove history rows; pinned rows only when `include_pinned`
    pub fn clear(&self, include_pinned: bool) -> Result<u64, HistoryError> {
        let _guard = self.write_guard()?;
        let deleted = self.db.clear(include_pinned)?;
        info!(deleted, include_pinned, "Cleared history");
        Ok(deleted)
    }

    /// Change the retention cap, persist it and evict down to it. Returns evicted ids.
    pub fn set_max_unpinned_items(&self, max: usize) -> Result<Vec<i64>, HistoryError> {
        let policy = RetentionPolicy::new(max)?;
        let _guard = self.write_guard()?;
        let evicted = self.db.apply_retention_cap(&policy)?;
        *self.retention.write() = policy;
        info!(max, evicted = evicted.len(), "Updated retention cap");
        Ok(evicted)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: i64) -> Result<ClipItem, HistoryError> {
        self.db.get_item(id)?.ok_or(HistoryError::NotFound(id))
    }

    pub fn list(&self, order: ListOrder) -> Result<Vec<ClipItem>, HistoryError> {
        self.query(&HistoryQuery::new().order(order))
    }

    /// Case-insensitive substring search, pinned rows first
    pub fn search(&self, keyword: &str) -> Result<Vec<ClipItem>, HistoryError> {
        self.query(&HistoryQuery::new().keyword(keyword))
    }

    /// Rows created within `[start, end]`
    pub fn filter_by_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<ClipItem>, HistoryError> {
        self.query(&HistoryQuery::new().created_between(start, end))
    }

    pub fn query(&self, query: &HistoryQuery) -> Result<Vec<ClipItem>, HistoryError> {
        Ok(self.db.query(query)?)
    }

    /// Run a query off the async executor. Dropping the returned future
    /// interrupts the statement.
    pub async fn query_async(&self, query: HistoryQuery) -> Result<Vec<ClipItem>, HistoryError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return self.query(&query);
        };

        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let runtime_for_closure = runtime.clone();
        let db = Arc::clone(&self.db);
        let token_clone = token.clone();

        let handle = runtime.spawn_blocking(move || {
            db.query_interruptible(&query, &token_clone, &runtime_for_closure)
        });

        match handle.await {
            Ok(result) => Ok(result?),
            // JoinError means the task panicked or was aborted
            Err(_join_error) => Err(HistoryError::Cancelled),
        }
    }

    pub fn storage_info(&self) -> Result<StorageInfo, HistoryError> {
        let mut info = self.db.storage_info()?;
        info.max_unpinned_items = self.max_unpinned_items();
        Ok(info)
    }
}
