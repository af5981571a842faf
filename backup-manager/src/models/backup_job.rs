use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Percent value reported once a job has failed.
pub const FAILED_PERCENT: i32 = -1;

/// Lifecycle stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Calculating,
    Archiving,
    Finalizing,
    Complete,
    Error,
    Cancelled,
    /// The slot is held by a restore rather than a backup.
    Restoring,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Error | JobState::Cancelled)
    }

    /// Only the scanning and archiving stages honour cancellation.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobState::Calculating | JobState::Archiving)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Calculating => "calculating",
            JobState::Archiving => "archiving",
            JobState::Finalizing => "finalizing",
            JobState::Complete => "complete",
            JobState::Error => "error",
            JobState::Cancelled => "cancelled",
            JobState::Restoring => "restoring",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of one job, as held in the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub job_id: String,
    pub entity_id: String,
    pub state: JobState,
    pub percent: i32,
    pub processed_files: usize,
    pub total_files: usize,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupJob {
    pub fn new(job_id: impl Into<String>, entity_id: impl Into<String>, state: JobState) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            entity_id: entity_id.into(),
            state,
            percent: 0,
            processed_files: 0,
            total_files: 0,
            processed_bytes: 0,
            total_bytes: 0,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// A backup, not a restore, that has not reached a terminal stage.
    pub fn is_backup_running(&self) -> bool {
        self.state != JobState::Restoring && !self.state.is_terminal()
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = JobState::Error;
        self.percent = FAILED_PERCENT;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.updated_at = Utc::now();
    }
}
