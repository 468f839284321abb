//! Fire-and-forget progress notifications.
//!
//! Events are published on a `tokio::sync::broadcast` channel. Consumers
//! subscribe through [`EventBus::subscribe`] and must tolerate out-of-order
//! delivery; lagging receivers lose the oldest events.

use crate::sync::SyncReport;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Default number of buffered events per receiver.
const DEFAULT_CAPACITY: usize = 1024;

/// An event published by a scan, duplicate scan or sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    ScanBatch(ScanEvent),
    ModelSync(SyncEvent),
    ModelSyncFinished(SyncReport),
}

/// State carried by a [`ScanEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Start,
    Progress,
    Error,
    Skip,
    Done,
    Finish,
}

/// Per-file or per-batch scan notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub batch: String,
    pub state: ScanState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status carried by a [`SyncEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Start,
    Error,
    Success,
    Withdrawn,
    Failed,
}

/// Per-model remote sync notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub model_id: i64,
    pub name: String,
    pub status: SyncStatus,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Broadcast channel shared by every component that reports progress.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Reporter that tags every scan event with a fresh batch id.
    pub fn batch(&self) -> BatchReporter {
        BatchReporter {
            bus: self.clone(),
            batch: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Emits [`ScanEvent`]s for one batch.
#[derive(Debug, Clone)]
pub struct BatchReporter {
    bus: EventBus,
    batch: String,
}

impl BatchReporter {
    pub fn id(&self) -> &str {
        &self.batch
    }

    fn send(&self, state: ScanState, file: Option<&Path>, amount: Option<usize>, message: Option<String>) {
        self.bus.emit(Event::ScanBatch(ScanEvent {
            batch: self.batch.clone(),
            state,
            file: file.map(Path::to_path_buf),
            amount,
            message,
        }));
    }

    /// Batch start, with the number of files to process.
    pub fn begin(&self, amount: usize) {
        self.send(ScanState::Start, None, Some(amount), None);
    }

    pub fn start(&self, file: &Path) {
        self.send(ScanState::Start, Some(file), None, None);
    }

    pub fn progress(&self, file: &Path) {
        self.send(ScanState::Progress, Some(file), Some(1), None);
    }

    pub fn error(&self, file: &Path, message: impl Into<String>) {
        self.send(ScanState::Error, Some(file), None, Some(message.into()));
    }

    pub fn skip(&self, file: &Path) {
        self.send(ScanState::Skip, Some(file), None, None);
    }

    pub fn done(&self, file: &Path) {
        self.send(ScanState::Done, Some(file), None, None);
    }

    pub fn finish(&self) {
        self.send(ScanState::Finish, None, None, None);
    }

    /// Batch end after cancellation; files not dispatched yet get no event.
    pub fn cancelled(&self) {
        self.send(ScanState::Finish, None, None, Some("cancelled".into()));
    }
}
