//! Query Engine
//!
//! `HistoryQuery` describes a read over the history table: keyword, creation
//! date range, kind, ordering and pagination. It compiles to one SELECT so a
//! query always sees a single point-in-time snapshot of the table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;

use crate::database::format_db_timestamp;
use crate::interface::{ClipKind, ListOrder};

/// ORDER BY for `ListOrder::PinnedFirst`.
/// Pinned rows: pin_order ascending (unset last), then created_at, then id.
/// Unpinned rows: last_seen_at descending, then id descending.
pub(crate) const PINNED_FIRST_ORDER: &str = r#"pinned DESC,
    CASE WHEN pinned = 1 THEN pin_order IS NULL END ASC,
    CASE WHEN pinned = 1 THEN pin_order END ASC,
    CASE WHEN pinned = 1 THEN created_at END ASC,
    CASE WHEN pinned = 1 THEN id END ASC,
    CASE WHEN pinned = 0 THEN last_seen_at END DESC,
    id DESC"#;

pub(crate) const RECENCY_ORDER: &str = "last_seen_at DESC, id DESC";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub keyword: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
    pub kind: Option<ClipKind>,
    pub order: ListOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn created_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.created_from = Some(start);
        self.created_to = Some(end);
        self
    }

    /// Rows created in the last `days` days, relative to `now`
    pub fn last_days(mut self, days: u32, now: DateTime<Utc>) -> Self {
        self.created_from = Some(now - Duration::days(i64::from(days)));
        self.created_to = Some(now);
        self
    }

    pub fn kind(mut self, kind: ClipKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn order(mut self, order: ListOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Lower-cased keyword, or None when blank
    pub(crate) fn normalized_keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    /// Whether the date bounds can never match
    pub(crate) fn is_empty_range(&self) -> bool {
        matches!((self.created_from, self.created_to), (Some(from), Some(to)) if from > to)
    }

    /// WHERE / ORDER BY / LIMIT tail appended to the item column list
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(keyword) = self.normalized_keyword() {
            params.push(Value::Text(keyword));
            clauses.push(format!("instr(search_text, ?{}) > 0", params.len()));
        }
        if let Some(from) = self.created_from {
            params.push(Value::Text(format_db_timestamp(from)));
            clauses.push(format!("created_at >= ?{}", params.len()));
        }
        if let Some(to) = self.created_to {
            params.push(Value::Text(format_db_timestamp(to)));
            clauses.push(format!("created_at <= ?{}", params.len()));
        }
        if let Some(kind) = self.kind {
            params.push(Value::Text(kind.database_type().to_string()));
            clauses.push(format!("kind = ?{}", params.len()));
        }

        let mut sql = String::new();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(match self.order {
            ListOrder::PinnedFirst => PINNED_FIRST_ORDER,
            ListOrder::RecencyOnly => RECENCY_ORDER,
        });

        // SQLite needs a LIMIT before OFFSET; -1 means unbounded
        if self.limit.is_some() || self.offset > 0 {
            let limit = self.limit.map(|l| l as i64).unwrap_or(-1);
            params.push(Value::Integer(limit));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
            params.push(Value::Integer(self.offset as i64));
            sql.push_str(&format!(" OFFSET ?{}", params.len()));
        }

        (sql, params)
    }
}
