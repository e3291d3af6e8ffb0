//! Retention policy: hard cap on unpinned rows.
//!
//! Eviction removes the least recently seen unpinned rows first and runs on the
//! caller's transaction, so an insert and the evictions it causes commit together.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::database::{Database, DatabaseResult};
use crate::interface::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_unpinned_items: usize,
}

impl RetentionPolicy {
    pub fn new(max_unpinned_items: usize) -> Result<Self, HistoryError> {
        if max_unpinned_items == 0 {
            return Err(HistoryError::InvalidInput(
                "max_unpinned_items must be at least 1".into(),
            ));
        }
        Ok(Self { max_unpinned_items })
    }

    pub fn max_unpinned_items(&self) -> usize {
        self.max_unpinned_items
    }

    /// Delete unpinned rows beyond the cap, oldest `last_seen_at` first.
    /// `protect_id` is never evicted. Returns the evicted ids.
    pub(crate) fn enforce(&self, conn: &Connection, protect_id: Option<i64>) -> DatabaseResult<Vec<i64>> {
        let count = Database::count_unpinned_on(conn)?;
        let cap = self.max_unpinned_items as u64;
        if count <= cap {
            return Ok(Vec::new());
        }
        let excess = (count - cap) as i64;

        let victims: Vec<i64> = {
            let mut stmt = conn.prepare(
                r#"SELECT id FROM clip_items
                   WHERE pinned = 0 AND (?1 IS NULL OR id != ?1)
                   ORDER BY last_seen_at ASC, id ASC
                   LIMIT ?2"#,
            )?;
            let rows = stmt.query_map(params![protect_id, excess], |row| row.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        let mut delete = conn.prepare("DELETE FROM clip_items WHERE id = ?1")?;
        for id in &victims {
            delete.execute([id])?;
        }

        debug!(
            evicted = victims.len(),
            cap = self.max_unpinned_items,
            "Retention evicted unpinned items"
        );
        Ok(victims)
    }
}
