//! Clipboard change detection
//!
//! `ChangeDetector` turns clipboard snapshots into history writes. It owns the
//! last observed content hash, so polling the same content twice records it once,
//! and it recognizes our own copy-backs through the shared `EchoGuard`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::interface::{CaptureOutcome, ClipItem, ClipPayload, HistoryError};
use crate::models::NewClip;
use crate::source::SourceError;
use crate::store::HistoryStore;

#[derive(Debug, Clone)]
struct EchoMarker {
    content_hash: String,
    origin_id: i64,
    armed_at: Instant,
}

/// Marks content we are about to write to the clipboard ourselves, so the
/// detector refreshes the originating row instead of recording it again.
#[derive(Debug)]
pub struct EchoGuard {
    marker: Mutex<Option<EchoMarker>>,
    window: Duration,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            marker: Mutex::new(None),
            window,
        }
    }

    /// Arm with the hash and id of the row being copied back. Replaces any earlier marker.
    pub fn arm(&self, content_hash: &str, origin_id: i64) {
        *self.marker.lock() = Some(EchoMarker {
            content_hash: content_hash.to_string(),
            origin_id,
            armed_at: Instant::now(),
        });
    }

    pub fn disarm(&self) {
        *self.marker.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.marker.lock().is_some()
    }

    /// Consume the marker if it is live and matches `content_hash`.
    /// Expired markers are dropped.
    fn take_matching(&self, content_hash: &str) -> Option<i64> {
        let mut marker = self.marker.lock();
        let current = marker.as_ref()?;

        if current.armed_at.elapsed() >= self.window {
            debug!(origin_id = current.origin_id, "Echo marker expired");
            *marker = None;
            return None;
        }
        if current.content_hash != content_hash {
            return None;
        }
        marker.take().map(|m| m.origin_id)
    }
}

/// What one detector cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Clipboard is empty or holds an unsupported format
    Empty,
    /// Content normalizes to nothing (whitespace-only text, empty list)
    Ignored,
    /// Same content as the previous cycle
    Unchanged,
    /// Our own copy-back; the originating row was refreshed
    EchoRefreshed(ClipItem),
    Captured(CaptureOutcome),
    /// Storage was unavailable; the payload is buffered for the next cycle
    Deferred,
    /// The store refused the write
    Rejected(HistoryError),
    SourceUnavailable(String),
}

/// A write that could not reach the store, replayed on the next cycle
#[derive(Debug)]
enum Pending {
    Capture(NewClip),
    /// Copy-back whose origin refresh hit a busy store
    Echo { origin_id: i64, clip: NewClip },
}

impl Pending {
    fn clip(&self) -> &NewClip {
        match self {
            Pending::Capture(clip) | Pending::Echo { clip, .. } => clip,
        }
    }
}

pub struct ChangeDetector {
    store: Arc<HistoryStore>,
    echo: Arc<EchoGuard>,
    last_observed: Option<String>,
    pending: Option<Pending>,
}

impl ChangeDetector {
    pub fn new(store: Arc<HistoryStore>, echo: Arc<EchoGuard>) -> Self {
        Self {
            store,
            echo,
            last_observed: None,
            pending: None,
        }
    }

    /// Hash of the last content seen on the clipboard
    pub fn last_observed(&self) -> Option<&str> {
        self.last_observed.as_deref()
    }

    /// Hash of the payload waiting to be stored, if any
    pub fn pending_hash(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.clip().content_hash.as_str())
    }

    /// Process one clipboard snapshot
    pub fn observe(&mut self, snapshot: Option<ClipPayload>) -> Observation {
        self.retry_pending();

        let Some(payload) = snapshot else {
            self.last_observed = None;
            return Observation::Empty;
        };

        let Some(clip) = NewClip::from_payload(payload, &self.store.normalize_options()) else {
            return Observation::Ignored;
        };

        if let Some(origin_id) = self.echo.take_matching(&clip.content_hash) {
            self.last_observed = Some(clip.content_hash.clone());
            match self.store.touch(origin_id) {
                Ok(item) => {
                    debug!(item_id = origin_id, "Clipboard echo refreshed origin item");
                    return Observation::EchoRefreshed(item);
                }
                Err(HistoryError::NotFound(_)) => {
                    debug!(item_id = origin_id, "Echo origin is gone, recording as new");
                    return self.record(clip);
                }
                Err(e) if e.is_transient() => {
                    warn!(item_id = origin_id, error = %e, "Store unavailable, deferring echo refresh");
                    self.defer(Pending::Echo { origin_id, clip });
                    return Observation::Deferred;
                }
                Err(e) => {
                    error!(item_id = origin_id, error = %e, "Echo refresh rejected by store");
                    return Observation::Rejected(e);
                }
            }
        }

        if self.last_observed.as_deref() == Some(clip.content_hash.as_str()) {
            return Observation::Unchanged;
        }

        self.last_observed = Some(clip.content_hash.clone());
        self.echo.disarm();
        self.record(clip)
    }

    /// A failed clipboard read still gives a buffered payload its retry
    pub fn observe_failure(&mut self, error: &SourceError) -> Observation {
        self.retry_pending();
        Observation::SourceUnavailable(error.to_string())
    }

    /// A read that timed out still gives a buffered payload its retry
    pub fn observe_timeout(&mut self) -> Observation {
        self.retry_pending();
        Observation::Unchanged
    }

    fn defer(&mut self, pending: Pending) {
        if self.pending.replace(pending).is_some() {
            debug!("Replaced older deferred capture");
        }
    }

    fn record(&mut self, clip: NewClip) -> Observation {
        match self.store.insert_or_touch(&clip) {
            Ok(outcome) => Observation::Captured(outcome),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Store unavailable, deferring capture");
                self.defer(Pending::Capture(clip));
                Observation::Deferred
            }
            Err(e) => {
                error!(error = %e, "Capture rejected by store");
                Observation::Rejected(e)
            }
        }
    }

    fn retry_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let result = match &pending {
            Pending::Capture(clip) => self.store.insert_or_touch(clip).map(|outcome| outcome.item.id),
            Pending::Echo { origin_id, clip } => match self.store.touch(*origin_id) {
                Err(HistoryError::NotFound(_)) => {
                    debug!(item_id = origin_id, "Echo origin is gone, recording as new");
                    self.store.insert_or_touch(clip).map(|outcome| outcome.item.id)
                }
                other => other.map(|item| item.id),
            },
        };
        match result {
            Ok(item_id) => {
                info!(item_id, "Stored deferred capture");
            }
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Deferred capture still pending");
                self.pending = Some(pending);
            }
            Err(e) => {
                error!(error = %e, "Dropping deferred capture");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::interface::{CaptureStatus, ListOrder};

    fn setup() -> (Arc<HistoryStore>, Arc<EchoGuard>, ChangeDetector) {
        let store = Arc::new(HistoryStore::open_in_memory(&HistoryConfig::default()).unwrap());
        let echo = Arc::new(EchoGuard::new(Duration::from_secs(5)));
        let detector = ChangeDetector::new(Arc::clone(&store), Arc::clone(&echo));
        (store, echo, detector)
    }

    fn text(s: &str) -> Option<ClipPayload> {
        Some(ClipPayload::Text(s.to_string()))
    }

    #[test]
    fn test_same_content_twice_is_unchanged() {
        let (store, _echo, mut detector) = setup();
        assert!(matches!(detector.observe(text("hello")), Observation::Captured(_)));
        assert_eq!(detector.observe(text("hello")), Observation::Unchanged);
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_and_blank_snapshots() {
        let (store, _echo, mut detector) = setup();
        assert_eq!(detector.observe(None), Observation::Empty);
        assert_eq!(detector.observe(text(" \n ")), Observation::Ignored);
        assert!(store.list(ListOrder::PinnedFirst).unwrap().is_empty());
    }

    #[test]
    fn test_returning_content_touches_existing_row() {
        let (store, _echo, mut detector) = setup();
        let Observation::Captured(first) = detector.observe(text("a")) else {
            panic!("expected capture");
        };
        detector.observe(text("b"));
        let Observation::Captured(again) = detector.observe(text("a")) else {
            panic!("expected capture");
        };
        assert_eq!(again.status, CaptureStatus::Touched);
        assert_eq!(again.item.id, first.item.id);
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 2);
    }

    #[test]
    fn test_echo_refreshes_origin() {
        let (store, echo, mut detector) = setup();
        let Observation::Captured(first) = detector.observe(text("reuse me")) else {
            panic!("expected capture");
        };
        detector.observe(text("something else"));
        store.pin(first.item.id).unwrap();

        echo.arm(&first.item.content_hash, first.item.id);
        let Observation::EchoRefreshed(item) = detector.observe(text("reuse me")) else {
            panic!("expected echo refresh");
        };
        assert_eq!(item.id, first.item.id);
        assert!(!echo.is_armed());

        // Pinned origin was refreshed, no second row was created
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 2);
        assert_eq!(detector.observe(text("reuse me")), Observation::Unchanged);
    }

    #[test]
    fn test_echo_discarded_by_other_content() {
        let (_store, echo, mut detector) = setup();
        let Observation::Captured(first) = detector.observe(text("one")) else {
            panic!("expected capture");
        };
        echo.arm(&first.item.content_hash, first.item.id);

        assert!(matches!(detector.observe(text("two")), Observation::Captured(_)));
        assert!(!echo.is_armed());
    }

    #[test]
    fn test_expired_echo_is_ignored() {
        let store = Arc::new(HistoryStore::open_in_memory(&HistoryConfig::default()).unwrap());
        let echo = Arc::new(EchoGuard::new(Duration::ZERO));
        let mut detector = ChangeDetector::new(Arc::clone(&store), Arc::clone(&echo));

        let Observation::Captured(first) = detector.observe(text("stale")) else {
            panic!("expected capture");
        };
        detector.observe(text("newer"));
        echo.arm(&first.item.content_hash, first.item.id);

        let Observation::Captured(outcome) = detector.observe(text("stale")) else {
            panic!("expected capture");
        };
        assert_eq!(outcome.status, CaptureStatus::Touched);
    }

    #[test]
    fn test_echo_with_deleted_origin_records_normally() {
        let (store, echo, mut detector) = setup();
        let Observation::Captured(first) = detector.observe(text("gone")) else {
            panic!("expected capture");
        };
        detector.observe(text("other"));
        store.delete(first.item.id).unwrap();

        echo.arm(&first.item.content_hash, first.item.id);
        let Observation::Captured(outcome) = detector.observe(text("gone")) else {
            panic!("expected capture");
        };
        assert_eq!(outcome.status, CaptureStatus::Inserted);
        assert_ne!(outcome.item.id, first.item.id);
    }

    #[test]
    fn test_independent_detectors() {
        let (store, echo, mut first) = setup();
        let mut second = ChangeDetector::new(Arc::clone(&store), echo);

        assert!(matches!(first.observe(text("shared")), Observation::Captured(_)));
        // The second detector has its own last-observed state
        assert!(matches!(second.observe(text("shared")), Observation::Captured(_)));
        assert_eq!(first.last_observed(), second.last_observed());
    }

    #[test]
    fn test_busy_store_defers_and_retries() {
        let config = HistoryConfig {
            busy_wait_ms: 5,
            ..Default::default()
        };
        let store = Arc::new(HistoryStore::open_in_memory(&config).unwrap());
        let echo = Arc::new(EchoGuard::new(Duration::from_secs(5)));
        let mut detector = ChangeDetector::new(Arc::clone(&store), echo);

        {
            let _held = store.hold_writer();
            assert_eq!(detector.observe(text("first")), Observation::Deferred);
            assert!(detector.pending_hash().is_some());
            // A newer payload replaces the buffered one
            assert_eq!(detector.observe(text("second")), Observation::Deferred);
        }

        // Next cycle flushes the buffer; the clipboard itself is unchanged
        assert_eq!(detector.observe(text("second")), Observation::Unchanged);
        assert!(detector.pending_hash().is_none());

        let texts: Vec<String> = store
            .list(ListOrder::PinnedFirst)
            .unwrap()
            .into_iter()
            .filter_map(|item| item.payload.as_text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["second"]);
    }

    #[test]
    fn test_source_failure_still_flushes_pending() {
        let config = HistoryConfig {
            busy_wait_ms: 5,
            ..Default::default()
        };
        let store = Arc::new(HistoryStore::open_in_memory(&config).unwrap());
        let mut detector = ChangeDetector::new(Arc::clone(&store), Arc::new(EchoGuard::new(Duration::from_secs(5))));

        {
            let _held = store.hold_writer();
            assert_eq!(detector.observe(text("buffered")), Observation::Deferred);
        }
        let observation = detector.observe_failure(&SourceError::Unavailable("locked".into()));
        assert!(matches!(observation, Observation::SourceUnavailable(_)));
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 1);
    }

    #[test]
    fn test_echo_of_pinned_row_under_busy_store_is_not_recorded() {
        let config = HistoryConfig {
            busy_wait_ms: 5,
            ..Default::default()
        };
        let store = Arc::new(HistoryStore::open_in_memory(&config).unwrap());
        let echo = Arc::new(EchoGuard::new(Duration::from_secs(5)));
        let mut detector = ChangeDetector::new(Arc::clone(&store), Arc::clone(&echo));

        let Observation::Captured(first) = detector.observe(text("hello")) else {
            panic!("expected capture");
        };
        detector.observe(text("other"));
        let pinned = store.pin(first.item.id).unwrap();

        echo.arm(&first.item.content_hash, first.item.id);
        {
            let _held = store.hold_writer();
            assert_eq!(detector.observe(text("hello")), Observation::Deferred);
        }
        assert_eq!(detector.observe(text("hello")), Observation::Unchanged);
        assert!(detector.pending_hash().is_none());

        let items = store.list(ListOrder::PinnedFirst).unwrap();
        let hellos: Vec<&ClipItem> = items
            .iter()
            .filter(|item| item.payload.as_text() == Some("hello"))
            .collect();
        assert_eq!(hellos.len(), 1);
        assert_eq!(hellos[0].id, first.item.id);
        assert!(hellos[0].pinned);
        assert!(hellos[0].last_seen_at >= pinned.last_seen_at);
    }

    #[test]
    fn test_deferred_echo_with_deleted_origin_records_normally() {
        let config = HistoryConfig {
            busy_wait_ms: 5,
            ..Default::default()
        };
        let store = Arc::new(HistoryStore::open_in_memory(&config).unwrap());
        let echo = Arc::new(EchoGuard::new(Duration::from_secs(5)));
        let mut detector = ChangeDetector::new(Arc::clone(&store), Arc::clone(&echo));

        let Observation::Captured(first) = detector.observe(text("fleeting")) else {
            panic!("expected capture");
        };
        detector.observe(text("other"));

        echo.arm(&first.item.content_hash, first.item.id);
        {
            let _held = store.hold_writer();
            assert_eq!(detector.observe(text("fleeting")), Observation::Deferred);
        }
        store.delete(first.item.id).unwrap();
        assert_eq!(detector.observe(text("fleeting")), Observation::Unchanged);

        let items = store.list(ListOrder::PinnedFirst).unwrap();
        assert!(items.iter().any(|item| item.payload.as_text() == Some("fleeting")));
        assert!(items.iter().all(|item| item.id != first.item.id));
    }

    #[test]
    fn test_timeout_still_flushes_pending() {
        let config = HistoryConfig {
            busy_wait_ms: 5,
            ..Default::default()
        };
        let store = Arc::new(HistoryStore::open_in_memory(&config).unwrap());
        let mut detector = ChangeDetector::new(Arc::clone(&store), Arc::new(EchoGuard::new(Duration::from_secs(5))));

        {
            let _held = store.hold_writer();
            assert_eq!(detector.observe(text("buffered")), Observation::Deferred);
        }
        assert_eq!(detector.observe_timeout(), Observation::Unchanged);
        assert!(detector.pending_hash().is_none());
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 1);
    }

    #[test]
    fn test_constraint_failure_is_rejected_and_detector_continues() {
        let (store, _echo, mut detector) = setup();
        store
            .execute_raw(
                "CREATE TRIGGER reject_secrets BEFORE INSERT ON clip_items \
                 WHEN NEW.preview LIKE '%secret%' \
                 BEGIN SELECT RAISE(ABORT, 'secret content'); END",
            )
            .unwrap();

        let observation = detector.observe(text("my secret token"));
        assert!(matches!(observation, Observation::Rejected(HistoryError::InvariantViolation(_))));
        assert!(detector.pending_hash().is_none());

        // Same content again is not retried; new content is recorded
        assert_eq!(detector.observe(text("my secret token")), Observation::Unchanged);
        assert!(matches!(detector.observe(text("public note")), Observation::Captured(_)));
        assert_eq!(store.list(ListOrder::PinnedFirst).unwrap().len(), 1);
    }
}
