//! Sidecar metadata stored next to each archive as `<archive>.json`.
//!
//! Filename parsing cannot reliably recover a display name that contains
//! dashes or characters replaced during sanitizing, so the declared name and
//! type are recorded here when the archive is finalized.

use crate::fs::naming::sidecar_filename;
use crate::models::BackupType;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSidecar {
    pub version: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub job_id: String,
    pub total_files: usize,
    pub total_bytes: u64,
}

impl ArchiveSidecar {
    pub const VERSION: u32 = 1;

    /// Location of the sidecar for `archive_path`.
    pub fn path_for(archive_path: &Path) -> PathBuf {
        let filename = archive_path
            .file_name()
            .map(|n| sidecar_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| sidecar_filename("archive"));
        archive_path.with_file_name(filename)
    }

    /// Write via a temporary file and rename so readers never see a torn record.
    pub fn write(&self, archive_path: &Path) -> Result<()> {
        let path = Self::path_for(archive_path);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the sidecar for `archive_path`, if one exists and parses.
    pub fn read(archive_path: &Path) -> Option<Self> {
        let path = Self::path_for(archive_path);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                debug!("Ignoring malformed sidecar {}: {}", path.display(), e);
                None
            }
        }
    }
}
