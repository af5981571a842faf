//! Restore of an archive over an entity's working tree.
//!
//! Restore is wipe-then-extract: everything under the root except the archive
//! store is removed before the archive is unpacked, so files absent from the
//! archive do not survive. The archive is opened and its
//! central directory read before anything is deleted. Once the wipe has
//! started there is no rollback; a failure part way leaves the root in a
//! mixed state.

use crate::archive::{extract_into, open_archive, ExtractStats};
use crate::utils::errors::{BackupError, Result};
use std::path::Path;
use tracing::{info, warn};

/// What a restore did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entries removed from the root
    pub removed: usize,
    /// Entries that could not be removed
    pub wipe_failures: usize,
    pub extracted: ExtractStats,
}

pub fn restore_archive(root: &Path, store_dir: &Path, archive_path: &Path) -> Result<RestoreReport> {
    if !archive_path.is_file() {
        return Err(BackupError::ArchiveNotFound(archive_path.display().to_string()));
    }
    let mut archive = open_archive(archive_path)?;

    let mut report = RestoreReport::default();
    wipe_dir(root, store_dir, &mut report)?;
    report.extracted = extract_into(&mut archive, root)?;

    info!(
        "Restored {} into {}: {} files, {} removed beforehand, {} could not be removed",
        archive_path.display(),
        root.display(),
        report.extracted.files,
        report.removed,
        report.wipe_failures
    );
    Ok(report)
}

/// Remove every entry under `dir` except the archive store. Directories that
/// contain the store are descended into rather than removed. Individual
/// failures are logged and counted.
fn wipe_dir(dir: &Path, store_dir: &Path, report: &mut RestoreReport) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                report.wipe_failures += 1;
                continue;
            }
        };

        let path = entry.path();
        if path == store_dir {
            continue;
        }
        if store_dir.starts_with(&path) {
            if let Err(e) = wipe_dir(&path, store_dir, report) {
                warn!("Failed to clear {} before restore: {}", path.display(), e);
                report.wipe_failures += 1;
            }
            continue;
        }

        let removed = match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Failed to remove {} before restore: {}", path.display(), e);
                report.wipe_failures += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::fs::walker::{walk_directory, WalkOptions};
    use std::fs;
    use tempfile::TempDir;

    fn archive_tree(root: &Path, store: &Path, dest: &Path) {
        let summary = walk_directory(root, &WalkOptions::excluding(store)).unwrap();
        let mut writer = ArchiveWriter::create(dest, 6).unwrap();
        for file in &summary.files {
            writer.add_entry(file).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_restore_returns_to_archived_state() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        let store = root.join("backups");
        fs::create_dir_all(root.join("b"))?;
        fs::create_dir_all(&store)?;
        fs::write(root.join("a.txt"), b"0123456789")?;
        fs::write(root.join("b/c.txt"), b"01234567890123456789")?;

        let archive = store.join("backup-x-auto.zip");
        archive_tree(&root, &store, &archive);

        fs::write(root.join("a.txt"), b"changed")?;
        fs::write(root.join("orphan.txt"), b"new file")?;
        fs::remove_dir_all(root.join("b"))?;

        let report = restore_archive(&root, &store, &archive)?;

        assert_eq!(report.extracted.files, 2);
        assert_eq!(fs::read(root.join("a.txt"))?, b"0123456789");
        assert_eq!(fs::read(root.join("b/c.txt"))?, b"01234567890123456789");
        assert!(!root.join("orphan.txt").exists());
        assert!(archive.exists());
        Ok(())
    }

    #[test]
    fn test_siblings_of_nested_store_are_wiped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        let store = root.join("data/backups");
        fs::create_dir_all(&store)?;
        fs::write(root.join("data/level.dat"), b"seed=1")?;

        let archive = store.join("backup-x-auto.zip");
        archive_tree(&root, &store, &archive);

        fs::write(root.join("data/orphan.txt"), b"created later")?;
        fs::write(root.join("data/level.dat"), b"seed=2")?;

        restore_archive(&root, &store, &archive)?;

        assert!(!root.join("data/orphan.txt").exists());
        assert_eq!(fs::read(root.join("data/level.dat"))?, b"seed=1");
        assert!(archive.exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_archive_leaves_tree_untouched() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        let store = root.join("backups");
        fs::create_dir_all(&store)?;
        fs::write(root.join("world.dat"), b"live data")?;

        let archive = store.join("backup-broken-auto.zip");
        fs::write(&archive, b"not a zip")?;

        assert!(restore_archive(&root, &store, &archive).is_err());
        assert_eq!(fs::read(root.join("world.dat"))?, b"live data");
        Ok(())
    }

    #[test]
    fn test_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("backups");
        let result = restore_archive(temp_dir.path(), &store, &store.join("backup-none.zip"));
        assert!(matches!(result, Err(BackupError::ArchiveNotFound(_))));
    }
}
