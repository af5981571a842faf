//! Events produced for external consumers (UI, IPC).
//!
//! Delivery is fire-and-forget. A progress event with `percent == -1` and an
//! `error` marks a failed job.

use crate::models::{BackupEntry, JobState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupProgressEvent {
    pub entity_id: String,
    pub percent: i32,
    pub stage: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCompletedEvent {
    pub entity_id: String,
    pub entry: BackupEntry,
}

/// Receiver of job events.
pub trait EventSink: Send + Sync {
    fn on_backup_progress(&self, event: BackupProgressEvent);

    fn on_backup_completed(&self, event: BackupCompletedEvent);
}

/// Wire form of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BackupEvent {
    #[serde(rename = "backup:progress")]
    Progress(BackupProgressEvent),

    #[serde(rename = "backup:completed")]
    Completed(BackupCompletedEvent),
}

impl BackupEvent {
    pub fn entity_id(&self) -> &str {
        match self {
            BackupEvent::Progress(e) => &e.entity_id,
            BackupEvent::Completed(e) => &e.entity_id,
        }
    }
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<BackupEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.tx.subscribe()
    }

    fn broadcast(&self, event: BackupEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No subscribers for event: {:?}", e.0);
        }
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn on_backup_progress(&self, event: BackupProgressEvent) {
        self.broadcast(BackupEvent::Progress(event));
    }

    fn on_backup_completed(&self, event: BackupCompletedEvent) {
        self.broadcast(BackupEvent::Completed(event));
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_backup_progress(&self, _event: BackupProgressEvent) {}

    fn on_backup_completed(&self, _event: BackupCompletedEvent) {}
}
