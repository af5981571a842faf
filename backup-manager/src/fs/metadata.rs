//! Filesystem metadata for finished archives.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Size and creation time of an archive, as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStat {
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl ArchiveStat {
    /// Stat `path`. Creation time falls back to modification time on
    /// filesystems that do not record birth time.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let created = metadata.created().or_else(|_| metadata.modified())?;

        Ok(Self {
            size: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
        })
    }
}
