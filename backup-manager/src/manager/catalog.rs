//! Listing of the archives in an entity's archive store.

use crate::archive::ArchiveSidecar;
use crate::fs::metadata::ArchiveStat;
use crate::fs::naming::{is_archive_filename, parse_archive_filename};
use crate::models::BackupEntry;
use crate::utils::errors::Result;
use std::path::Path;
use tracing::{debug, warn};

/// List finished archives in `store_dir`, newest first.
///
/// The type always comes from the filename. The display name comes from the
/// sidecar when one exists, otherwise from the filename. Size and creation
/// time come from the filesystem; entries that fail to stat are skipped.
pub fn list_archives(store_dir: &Path) -> Result<Vec<BackupEntry>> {
    let read_dir = match std::fs::read_dir(store_dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", store_dir.display(), e);
                continue;
            }
        };

        let Some(filename) = dir_entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(parsed) = parse_archive_filename(&filename) else {
            continue;
        };

        let path = dir_entry.path();
        let stat = match ArchiveStat::from_path(&path) {
            Ok(stat) => stat,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let name = match ArchiveSidecar::read(&path) {
            Some(sidecar) => sidecar.name,
            None => parsed.display_name(),
        };

        entries.push(BackupEntry {
            name,
            filename,
            path,
            size: stat.size,
            created_at: stat.created_at,
            backup_type: parsed.backup_type,
        });
    }

    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    Ok(entries)
}

/// Whether `store_dir` contains an archive called `filename`.
pub fn archive_exists(store_dir: &Path, filename: &str) -> bool {
    is_archive_filename(filename) && store_dir.join(filename).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupType;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_store_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_archives(&temp_dir.path().join("backups")).unwrap().is_empty());
    }

    #[test]
    fn test_lists_only_finished_archives() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path();
        fs::write(store.join("backup-2026-10-19T08-30-05-123Z-auto.zip"), b"zip").unwrap();
        fs::write(store.join("backup-2026-10-19T09-00-00-000Z-Weekly.zip.part"), b"zip").unwrap();
        fs::write(store.join("backup-2026-10-19T08-30-05-123Z-auto.zip.json"), b"{").unwrap();
        fs::write(store.join("notes.txt"), b"hello").unwrap();
        fs::create_dir(store.join("backup-dir.zip")).unwrap();

        let entries = list_archives(store).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].backup_type, BackupType::Auto);
        assert_eq!(entries[0].size, 3);
        assert!(entries[0].name.starts_with("Auto backup"));
    }

    #[test]
    fn test_sidecar_supplies_name_but_not_type() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("backup-2026-10-19T08-30-05-123Z-pre-1_2.zip");
        fs::write(&archive, b"zip").unwrap();
        ArchiveSidecar {
            version: ArchiveSidecar::VERSION,
            name: "pre 1.2".to_string(),
            backup_type: BackupType::Auto,
            created_at: Utc::now(),
            job_id: "job".to_string(),
            total_files: 1,
            total_bytes: 3,
        }
        .write(&archive)
        .unwrap();

        let entries = list_archives(temp_dir.path()).unwrap();
        assert_eq!(entries[0].name, "pre 1.2");
        assert_eq!(entries[0].backup_type, BackupType::Manual);
    }

    #[test]
    fn test_sorted_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["backup-a-auto.zip", "backup-b-auto.zip", "backup-c.zip"] {
            fs::write(temp_dir.path().join(name), name.as_bytes()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let entries = list_archives(temp_dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["backup-c.zip", "backup-b-auto.zip", "backup-a-auto.zip"]);
        for pair in entries.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }
}
