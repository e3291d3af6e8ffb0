//! ClipboardHistory - UI-facing facade
//!
//! Ties a history store to a clipboard source. The echo guard is shared with
//! every monitor created here, so copying an item back to the clipboard
//! refreshes that item instead of recording it a second time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::HistoryConfig;
use crate::detector::EchoGuard;
use crate::interface::{ClipItem, HistoryApi, HistoryError, ListOrder, StorageInfo};
use crate::monitor::{ClipboardMonitor, MonitorHandle};
use crate::query::HistoryQuery;
use crate::source::ClipboardSource;
use crate::store::HistoryStore;

pub struct ClipboardHistory<S> {
    store: Arc<HistoryStore>,
    source: Arc<S>,
    echo: Arc<EchoGuard>,
    config: HistoryConfig,
}

impl<S: ClipboardSource + 'static> ClipboardHistory<S> {
    pub fn new(store: Arc<HistoryStore>, source: Arc<S>, config: HistoryConfig) -> Self {
        Self {
            echo: Arc::new(EchoGuard::new(config.echo_window())),
            store,
            source,
            config,
        }
    }

    /// Open the configured database and attach `source`
    pub fn open(config: HistoryConfig, source: Arc<S>) -> Result<Self, HistoryError> {
        let store = Arc::new(HistoryStore::open(&config)?);
        Ok(Self::new(store, source, config))
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn echo_guard(&self) -> &Arc<EchoGuard> {
        &self.echo
    }

    /// A monitor over this history's source, sharing its echo guard
    pub fn monitor(&self) -> ClipboardMonitor<S> {
        ClipboardMonitor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.echo),
            &self.config,
        )
    }

    pub fn start_monitor(&self) -> MonitorHandle {
        self.monitor().spawn()
    }

    pub fn set_max_unpinned_items(&self, max: usize) -> Result<Vec<i64>, HistoryError> {
        self.store.set_max_unpinned_items(max)
    }
}

#[async_trait]
impl<S: ClipboardSource + 'static> HistoryApi for ClipboardHistory<S> {
    async fn list_history(&self, order: ListOrder) -> Result<Vec<ClipItem>, HistoryError> {
        self.store.query_async(HistoryQuery::new().order(order)).await
    }

    async fn search(&self, keyword: String) -> Result<Vec<ClipItem>, HistoryError> {
        self.store.query_async(HistoryQuery::new().keyword(keyword)).await
    }

    async fn filter_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClipItem>, HistoryError> {
        self.store
            .query_async(HistoryQuery::new().created_between(start, end))
            .await
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<ClipItem>, HistoryError> {
        self.store.query_async(query).await
    }

    fn get_item(&self, item_id: i64) -> Result<ClipItem, HistoryError> {
        self.store.get(item_id)
    }

    fn storage_info(&self) -> Result<StorageInfo, HistoryError> {
        self.store.storage_info()
    }

    fn pin(&self, item_id: i64) -> Result<ClipItem, HistoryError> {
        self.store.pin(item_id)
    }

    fn unpin(&self, item_id: i64) -> Result<ClipItem, HistoryError> {
        self.store.unpin(item_id)
    }

    async fn copy_to_clipboard(&self, item_id: i64) -> Result<ClipItem, HistoryError> {
        let item = self.store.get(item_id)?;

        // Armed before the write so the very next cycle already sees it
        self.echo.arm(&item.content_hash, item.id);
        if let Err(e) = self.source.write(&item.payload).await {
            self.echo.disarm();
            return Err(HistoryError::SourceWrite(e.to_string()));
        }

        info!(item_id, "Copied history item to clipboard");
        Ok(item)
    }

    fn delete(&self, item_id: i64) -> Result<(), HistoryError> {
        self.store.delete(item_id)
    }

    fn clear(&self, include_pinned: bool) -> Result<u64, HistoryError> {
        self.store.clear(include_pinned)
    }
}
