//! Messages sent from an archival worker to the manager.
//!
//! The worker never touches the status table or the event sink directly; the
//! manager consumes this channel in order and applies each message.

use crate::models::{BackupType, JobState};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Percent and counters at a point in the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: i32,
    pub stage: JobState,
    pub processed_files: Option<usize>,
    pub total_files: Option<usize>,
    pub processed_bytes: u64,
    pub total_bytes: u64,
}

/// A finalized archive, as reported by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedArchive {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub name: String,
    pub backup_type: BackupType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Progress(ProgressUpdate),
    Complete(CompletedArchive),
    Error { message: String },
    /// Diagnostic text; logged by the manager and never forwarded.
    Log { text: String },
}

/// Sending half held by the worker. Usable from blocking threads.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

pub type ProgressReceiver = mpsc::UnboundedReceiver<WorkerMessage>;

impl ProgressSender {
    /// Messages sent after the manager stopped listening are dropped.
    pub fn send(&self, message: WorkerMessage) {
        let _ = self.tx.send(message);
    }

    pub fn log(&self, text: impl Into<String>) {
        self.send(WorkerMessage::Log { text: text.into() });
    }
}

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (tx, mut rx) = channel();
        std::thread::spawn(move || {
            tx.log("scanning");
            tx.send(WorkerMessage::Error { message: "boom".into() });
        })
        .join()
        .unwrap();

        assert_eq!(rx.recv().await, Some(WorkerMessage::Log { text: "scanning".into() }));
        assert_eq!(rx.recv().await, Some(WorkerMessage::Error { message: "boom".into() }));
        assert_eq!(rx.recv().await, None);
    }
}
