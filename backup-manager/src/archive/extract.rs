//! Extraction of an archive into a directory.

use crate::utils::errors::Result;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

/// Counters reported after an extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Entries whose names would escape the target directory
    pub rejected: usize,
}

/// Open an archive and read its central directory.
///
/// Used before any destructive step so that a corrupt archive is reported
/// while the target tree is still intact.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// Extract every entry into `target`, overwriting existing files.
pub fn extract_into(archive: &mut ZipArchive<File>, target: &Path) -> Result<ExtractStats> {
    let mut stats = ExtractStats::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let Some(relative) = entry.enclosed_name() else {
            warn!("Refusing to extract entry with unsafe name: {}", entry.name());
            stats.rejected += 1;
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            stats.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        let written = io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode)) {
                debug!("Could not restore permissions on {}: {}", out_path.display(), e);
            }
        }

        stats.files += 1;
        stats.bytes += written;
    }

    Ok(stats)
}
