//! Custom error types for the backup manager.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity root directory is missing or not a directory: {0}")]
    RootMissing(String),

    #[error("A backup or restore is already in progress for entity {0}")]
    AlreadyRunning(String),

    #[error("Backup archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Invalid backup filename: {0}")]
    InvalidFilename(String),

    #[error("Archive store must be a single directory name under the entity root: {0}")]
    InvalidStore(String),

    #[error("No files found to back up in {0}")]
    EmptyTree(String),

    #[error("None of the discovered files in {0} could be read")]
    Unreadable(String),

    #[error("Archive error: {0}")]
    Codec(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive verification failed: {0}")]
    Verification(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    /// Input errors are reported before any work is started.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BackupError::EntityNotFound(_)
                | BackupError::RootMissing(_)
                | BackupError::ArchiveNotFound(_)
                | BackupError::InvalidFilename(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
