//! Clipboard source abstraction.
//!
//! The OS clipboard bindings live outside this crate; they plug in through
//! `ClipboardSource`. `MemoryClipboard` is an in-process clipboard used by the
//! CLI `capture` command and by tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::interface::ClipPayload;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard write rejected: {0}")]
    WriteRejected(String),
}

/// Read/write access to a clipboard
#[async_trait]
pub trait ClipboardSource: Send + Sync {
    /// Current clipboard content, or None when empty or in an unsupported format
    async fn read_current(&self) -> Result<Option<ClipPayload>, SourceError>;

    async fn write(&self, payload: &ClipPayload) -> Result<(), SourceError>;
}

#[async_trait]
impl<S: ClipboardSource + ?Sized> ClipboardSource for Arc<S> {
    async fn read_current(&self) -> Result<Option<ClipPayload>, SourceError> {
        (**self).read_current().await
    }

    async fn write(&self, payload: &ClipPayload) -> Result<(), SourceError> {
        (**self).write(payload).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    current: Option<ClipPayload>,
    change_count: u64,
    failing_reads: usize,
    read_delay: Option<Duration>,
    reject_writes: bool,
    writes: Vec<ClipPayload>,
}

/// In-process clipboard
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    state: Mutex<MemoryState>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(payload: ClipPayload) -> Self {
        let clipboard = Self::new();
        clipboard.set(payload);
        clipboard
    }

    /// Simulate a copy by another application
    pub fn set(&self, payload: ClipPayload) {
        let mut state = self.state.lock();
        state.current = Some(payload);
        state.change_count += 1;
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.change_count += 1;
    }

    /// Make the next `count` reads fail
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().failing_reads = count;
    }

    /// Delay every read, for exercising read timeouts
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state.lock().reject_writes = reject;
    }

    /// Bumped on every change, like the pasteboard change count
    pub fn change_count(&self) -> u64 {
        self.state.lock().change_count
    }

    /// Payloads written through `ClipboardSource::write`, oldest first
    pub fn writes(&self) -> Vec<ClipPayload> {
        self.state.lock().writes.clone()
    }
}

#[async_trait]
impl ClipboardSource for MemoryClipboard {
    async fn read_current(&self) -> Result<Option<ClipPayload>, SourceError> {
        let delay = {
            let mut state = self.state.lock();
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(SourceError::Unavailable("clipboard is locked".into()));
            }
            state.read_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().current.clone())
    }

    async fn write(&self, payload: &ClipPayload) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        if state.reject_writes {
            return Err(SourceError::WriteRejected("clipboard refused the write".into()));
        }
        state.current = Some(payload.clone());
        state.change_count += 1;
        state.writes.push(payload.clone());
        Ok(())
    }
}
