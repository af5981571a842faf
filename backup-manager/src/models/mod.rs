//! Data model shared by the manager, the worker and the API layer.

pub mod backup_entry;
pub mod backup_job;
pub mod policy;

pub use backup_entry::{BackupEntry, BackupType};
pub use backup_job::{BackupJob, JobState, FAILED_PERCENT};
pub use policy::BackupPolicy;
