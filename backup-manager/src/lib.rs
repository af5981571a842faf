//! Backup Manager Library
//!
//! Per-entity zip backups of a working directory, run off the caller's path
//! with live progress, cancellation, restore and an auto-backup sweep.

pub mod api;
pub mod archive;
pub mod config;
pub mod daemon;
pub mod entity;
pub mod events;
pub mod executor;
pub mod fs;
pub mod manager;
pub mod models;
pub mod scheduler;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use entity::{EntityRecord, EntityResolver, FilePolicyStore, PolicyStore, StaticEntities};
pub use events::{BackupEvent, BroadcastSink, EventSink};
pub use executor::runner::{CooperativeRunner, ExecutionStrategy, JobRunner, ThreadRunner};
pub use manager::{BackupManager, JobOutcome, JobTicket, ManagerSettings};
pub use models::{BackupEntry, BackupJob, BackupPolicy, BackupType, JobState};
pub use scheduler::{AutoBackupScheduler, SweepClock};
pub use utils::errors::{BackupError, Result};
