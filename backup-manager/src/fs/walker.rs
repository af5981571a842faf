//! Directory traversal for archiving.
//!
//! Enumerates every regular file below an entity root, skipping the archive
//! store. Per-entry failures (permission denied, broken symlinks, files that
//! vanish mid-walk) are logged and skipped so a partially readable tree still
//! produces a usable backup.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory excluded from the walk together with everything below it.
    pub exclude_dir: Option<PathBuf>,

    /// Follow symbolic links while descending
    pub follow_links: bool,
}

impl WalkOptions {
    /// Walk everything except `exclude_dir`.
    pub fn excluding(exclude_dir: impl Into<PathBuf>) -> Self {
        Self {
            exclude_dir: Some(exclude_dir.into()),
            follow_links: false,
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_dir: None,
            follow_links: false,
        }
    }
}

/// A regular file discovered during the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,

    /// Path relative to the walked root
    pub relative_path: PathBuf,

    /// File size in bytes at walk time
    pub size: u64,
}

impl FileEntry {
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None for directories, symlinks to directories and broken links.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        if raw_metadata.is_dir() {
            return Ok(None);
        }

        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let size = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                _ => return Ok(None),
            }
        } else if raw_metadata.is_file() {
            raw_metadata.len()
        } else {
            // sockets, fifos, devices
            return Ok(None);
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
        }))
    }

    /// Name of this file inside an archive: relative path with `/` separators.
    pub fn archive_name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Result of a completed walk
#[derive(Debug, Clone, Default)]
pub struct WalkSummary {
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
    /// Entries that could not be inspected and were left out
    pub skipped: usize,
}

impl WalkSummary {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// Returns true if `path` is `excluded` itself or lies below it.
///
/// Comparison is per path component, so `/srv/backups-old` is not treated as
/// being inside `/srv/backups`.
pub fn is_excluded(path: &Path, excluded: &Path) -> bool {
    path.starts_with(excluded)
}

/// Walk a directory tree and collect all regular files.
///
/// Entries are visited in file-name order so repeated walks over an unchanged
/// tree yield the same sequence. Only a failure to read `root` itself is an
/// error.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<WalkSummary> {
    std::fs::read_dir(root)?;

    let mut summary = WalkSummary::default();
    let exclude = options.exclude_dir.as_deref();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match exclude {
            Some(excluded) => !is_excluded(entry.path(), excluded),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match FileEntry::from_entry(&entry, root) {
            Ok(Some(file)) => {
                summary.total_bytes += file.size;
                summary.files.push(file);
            }
            Ok(None) => {
                debug!("Skipping non-regular entry: {}", entry.path().display());
            }
            Err(e) => {
                warn!("Skipping {}: {}", entry.path().display(), e);
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let summary = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(summary.total_files(), 0);
        assert_eq!(summary.total_bytes, 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("b"))?;
        fs::write(temp_dir.path().join("a.txt"), b"0123456789")?;
        fs::write(temp_dir.path().join("b/c.txt"), b"01234567890123456789")?;

        let summary = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(summary.total_files(), 2);
        assert_eq!(summary.total_bytes, 30);

        let names: Vec<String> = summary.files.iter().map(|f| f.archive_name()).collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b/c.txt".to_string()]);

        Ok(())
    }

    #[test]
    fn test_excluded_directory_and_prefix_sibling() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir(root.join("backups"))?;
        fs::create_dir(root.join("backups-old"))?;
        fs::write(root.join("backups/backup-1.zip"), b"archive")?;
        fs::write(root.join("backups-old/keep.txt"), b"keep")?;
        fs::write(root.join("world.dat"), b"data")?;

        let summary = walk_directory(root, &WalkOptions::excluding(root.join("backups")))?;
        let names: Vec<String> = summary.files.iter().map(|f| f.archive_name()).collect();

        assert_eq!(names, vec!["backups-old/keep.txt".to_string(), "world.dat".to_string()]);
        Ok(())
    }

    #[test]
    fn test_is_excluded_component_match() {
        let excluded = Path::new("/srv/mc/backups");
        assert!(is_excluded(Path::new("/srv/mc/backups"), excluded));
        assert!(is_excluded(Path::new("/srv/mc/backups/a.zip"), excluded));
        assert!(!is_excluded(Path::new("/srv/mc/backups2/a.zip"), excluded));
        assert!(!is_excluded(Path::new("/srv/mc"), excluded));
    }

    #[test]
    fn test_walk_order_is_stable() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        for name in ["z.txt", "m.txt", "a.txt"] {
            fs::write(temp_dir.path().join(name), name.as_bytes())?;
        }

        let first = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let second = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(first.files, second.files);
        assert_eq!(first.files[0].archive_name(), "a.txt");
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(walk_directory(&missing, &WalkOptions::default()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_is_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("real.txt"), b"real")?;
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), temp_dir.path().join("dangling"))?;

        let summary = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(summary.total_files(), 1);
        assert_eq!(summary.files[0].archive_name(), "real.txt");
        Ok(())
    }
}
