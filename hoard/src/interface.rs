//! Hoard public interface
//!
//! Shared types handed to the UI collaborator, the error type, and the
//! `HistoryApi` trait that the UI drives.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::HistoryQuery;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Capability type of a clipboard payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Text,
    Image,
    FileList,
}

impl ClipKind {
    /// Value stored in the `kind` column
    pub fn database_type(&self) -> &'static str {
        match self {
            ClipKind::Text => "text",
            ClipKind::Image => "image",
            ClipKind::FileList => "file_list",
        }
    }

    pub fn from_database(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ClipKind::Text),
            "image" => Some(ClipKind::Image),
            "file_list" => Some(ClipKind::FileList),
            _ => None,
        }
    }
}

/// Type-safe clipboard content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ClipPayload {
    Text(String),
    Image(#[serde(with = "base64_bytes")] Vec<u8>),
    FileList(Vec<String>),
}

impl ClipPayload {
    pub fn kind(&self) -> ClipKind {
        match self {
            ClipPayload::Text(_) => ClipKind::Text,
            ClipPayload::Image(_) => ClipKind::Image,
            ClipPayload::FileList(_) => ClipKind::FileList,
        }
    }

    /// Text payload, if this is a text item
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClipPayload::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Display ordering for history listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Pinned rows first (by pin order), then unpinned rows newest first
    #[default]
    PinnedFirst,
    /// Every row by `last_seen_at`, newest first
    RecencyOnly,
}

/// What `insert_or_touch` did with a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Inserted,
    Touched,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded clipboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipItem {
    pub id: i64,
    pub content_hash: String,
    pub payload: ClipPayload,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub pinned: bool,
    pub pin_order: Option<i64>,
    /// Size of the normalized payload in bytes
    pub byte_size: u64,
}

impl ClipItem {
    pub fn kind(&self) -> ClipKind {
        self.payload.kind()
    }
}

/// Result of a capture through the history store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureOutcome {
    pub item: ClipItem,
    pub status: CaptureStatus,
    /// Ids removed by the retention policy in the same transaction
    pub evicted: Vec<i64>,
}

/// Storage usage summary
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StorageInfo {
    pub item_count: u64,
    pub pinned_count: u64,
    pub unpinned_count: u64,
    /// Sum of payload sizes
    pub total_bytes: u64,
    pub kind_counts: BTreeMap<ClipKind, u64>,
    /// Size of the SQLite file (page_count * page_size)
    pub database_bytes: u64,
    pub max_unpinned_items: usize,
}

/// Error type for history operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Clipboard read failed: {0}")]
    SourceRead(String),
    #[error("Clipboard write failed: {0}")]
    SourceWrite(String),
    #[error("Storage error: {0}")]
    StorageIo(String),
    #[error("Store is busy")]
    Busy,
    #[error("Item {0} not found")]
    NotFound(i64),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl HistoryError {
    /// Whether a capture that failed with this error is worth retrying next cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, HistoryError::StorageIo(_) | HistoryError::Busy)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Operations exposed to the UI collaborator.
#[async_trait::async_trait]
pub trait HistoryApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Full history in the requested display order
    async fn list_history(&self, order: ListOrder) -> Result<Vec<ClipItem>, HistoryError>;

    /// Case-insensitive substring search, pinned rows first
    async fn search(&self, keyword: String) -> Result<Vec<ClipItem>, HistoryError>;

    /// Rows whose `created_at` lies in `[start, end]`
    async fn filter_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClipItem>, HistoryError>;

    /// Combined keyword / date / kind query with pagination
    async fn query(&self, query: HistoryQuery) -> Result<Vec<ClipItem>, HistoryError>;

    fn get_item(&self, item_id: i64) -> Result<ClipItem, HistoryError>;

    fn storage_info(&self) -> Result<StorageInfo, HistoryError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    fn pin(&self, item_id: i64) -> Result<ClipItem, HistoryError>;

    fn unpin(&self, item_id: i64) -> Result<ClipItem, HistoryError>;

    /// Put an item back on the clipboard without re-recording it
    async fn copy_to_clipboard(&self, item_id: i64) -> Result<ClipItem, HistoryError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Delete Operations
    // ─────────────────────────────────────────────────────────────────────────────

    fn delete(&self, item_id: i64) -> Result<(), HistoryError>;

    /// Remove history rows. Returns the number of rows deleted.
    fn clear(&self, include_pinned: bool) -> Result<u64, HistoryError>;
}

impl From<crate::database::DatabaseError> for HistoryError {
    fn from(e: crate::database::DatabaseError) -> Self {
        use crate::database::DatabaseError;
        match e {
            DatabaseError::NotFound(id) => HistoryError::NotFound(id),
            DatabaseError::Constraint(msg) => HistoryError::InvariantViolation(msg),
            DatabaseError::Interrupted => HistoryError::Cancelled,
            DatabaseError::InvalidInput(msg) => HistoryError::InvalidInput(msg),
            other => HistoryError::StorageIo(other.to_string()),
        }
    }
}

impl From<crate::source::SourceError> for HistoryError {
    fn from(e: crate::source::SourceError) -> Self {
        HistoryError::SourceRead(e.to_string())
    }
}

/// Base64 encoding for image bytes in JSON output
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
