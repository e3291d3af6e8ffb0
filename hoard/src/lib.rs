//! Hoard Core - clipboard history engine
//!
//! Watches a clipboard source, records each distinct item into a SQLite-backed
//! history, and serves listing, search and date queries to a UI. Pinned items
//! are exempt from the retention cap and from deduplication.

pub mod clock;
pub mod config;
pub mod database;
pub mod detector;
pub mod history;
pub mod interface;
pub mod models;
pub mod monitor;
pub mod query;
pub mod retention;
pub mod source;
mod store;

pub use config::HistoryConfig;
pub use detector::{ChangeDetector, EchoGuard, Observation};
pub use history::ClipboardHistory;
pub use interface::*;
pub use monitor::{ClipboardMonitor, MonitorHandle};
pub use query::HistoryQuery;
pub use retention::RetentionPolicy;
pub use source::{ClipboardSource, MemoryClipboard, SourceError};
pub use store::HistoryStore;
