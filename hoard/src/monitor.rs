//! Clipboard monitor loop
//!
//! Polls a `ClipboardSource` on a fixed interval (or on demand through
//! `MonitorHandle::notify`) and feeds each snapshot to the change detector.
//! Stop requests are honored between cycles only, so a capture is never
//! abandoned halfway through.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::HistoryConfig;
use crate::detector::{ChangeDetector, EchoGuard, Observation};
use crate::interface::HistoryError;
use crate::source::ClipboardSource;
use crate::store::HistoryStore;

pub struct ClipboardMonitor<S> {
    source: Arc<S>,
    detector: Arc<Mutex<ChangeDetector>>,
    notify: Arc<Notify>,
    poll_interval: Duration,
    read_timeout: Duration,
}

impl<S: ClipboardSource + 'static> ClipboardMonitor<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<HistoryStore>,
        echo: Arc<EchoGuard>,
        config: &HistoryConfig,
    ) -> Self {
        Self {
            source,
            detector: Arc::new(Mutex::new(ChangeDetector::new(store, echo))),
            notify: Arc::new(Notify::new()),
            poll_interval: config.poll_interval(),
            read_timeout: config.source_read_timeout(),
        }
    }

    pub fn detector(&self) -> MutexGuard<'_, ChangeDetector> {
        self.detector.lock()
    }

    /// Run exactly one read/detect cycle.
    ///
    /// Store writes can wait on the writer lock and SQLite's busy timeout, so
    /// the detector runs on the blocking pool.
    pub async fn tick(&mut self) -> Observation {
        let read = tokio::time::timeout(self.read_timeout, self.source.read_current()).await;
        let timeout_ms = self.read_timeout.as_millis() as u64;
        let detector = Arc::clone(&self.detector);

        let handle = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock();
            match read {
                Err(_elapsed) => {
                    debug!(timeout_ms, "Clipboard read timed out");
                    detector.observe_timeout()
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Clipboard read failed (will retry)");
                    detector.observe_failure(&e)
                }
                Ok(Ok(snapshot)) => detector.observe(snapshot),
            }
        });

        let observation = match handle.await {
            Ok(observation) => observation,
            Err(join_error) => {
                error!(error = %join_error, "Detector task failed");
                Observation::Rejected(HistoryError::Cancelled)
            }
        };

        match &observation {
            Observation::Captured(outcome) => debug!(
                item_id = outcome.item.id,
                status = ?outcome.status,
                "Clipboard change recorded"
            ),
            Observation::EchoRefreshed(item) => debug!(item_id = item.id, "Clipboard echo absorbed"),
            Observation::Deferred => debug!("Clipboard change deferred"),
            other => trace!(observation = ?other, "Clipboard cycle"),
        }
        observation
    }

    /// Poll until `token` is cancelled
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Clipboard monitor started"
        );
        let notify = Arc::clone(&self.notify);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            self.tick().await;
        }

        info!("Clipboard monitor stopped");
    }

    /// Run the loop on the current tokio runtime
    pub fn spawn(self) -> MonitorHandle {
        let token = CancellationToken::new();
        let notify = Arc::clone(&self.notify);
        let join = tokio::spawn(self.run(token.clone()));
        MonitorHandle { token, notify, join }
    }
}

/// Control handle for a spawned monitor
pub struct MonitorHandle {
    token: CancellationToken,
    notify: Arc<Notify>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Request a stop; the current cycle, if any, completes first
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wake the loop for an immediate cycle, e.g. on an OS change notification
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.join.await
    }

    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.join().await
    }
}
