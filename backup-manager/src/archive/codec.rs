//! Streaming zip writer with byte accounting.
//!
//! Entries are written one at a time so the caller can drive the writer in
//! small batches and report progress between them. A source file that cannot
//! be opened or read is skipped; a failure writing the container is fatal.

use crate::fs::walker::FileEntry;
use crate::utils::errors::Result;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CHUNK_SIZE: usize = 64 * 1024;

/// Entries at or above this size need zip64 headers.
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Result of feeding one source file to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Entry committed with this many source bytes
    Written(u64),
    /// Source could not be read; nothing was committed
    Skipped(String),
}

/// Zip archive being written to `destination`.
pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    destination: PathBuf,
    options: SimpleFileOptions,
    bytes_processed: u64,
    entries_committed: usize,
    entries_skipped: usize,
    buffer: Vec<u8>,
}

impl ArchiveWriter {
    /// Create the destination file and start an empty archive.
    ///
    /// `compression_level` of 0 stores entries uncompressed.
    pub fn create(destination: &Path, compression_level: u32) -> Result<Self> {
        let file = File::create(destination)?;
        let options = if compression_level == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(compression_level.min(9))))
        };

        Ok(Self {
            zip: ZipWriter::new(file),
            destination: destination.to_path_buf(),
            options,
            bytes_processed: 0,
            entries_committed: 0,
            entries_skipped: 0,
            buffer: vec![0u8; CHUNK_SIZE],
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Source bytes streamed into committed entries so far.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn entries_committed(&self) -> usize {
        self.entries_committed
    }

    pub fn entries_skipped(&self) -> usize {
        self.entries_skipped
    }

    /// Stream one file into the archive under its relative name.
    pub fn add_entry(&mut self, entry: &FileEntry) -> Result<EntryOutcome> {
        let file = match File::open(&entry.path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", entry.path.display(), e);
                self.entries_skipped += 1;
                return Ok(EntryOutcome::Skipped(e.to_string()));
            }
        };
        // The walk-time size may be stale for files that are still being written.
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(entry.size);
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);

        let options = self.options.large_file(needs_large_file(entry.size, current_size));
        self.zip.start_file(entry.archive_name(), options)?;

        let mut written = 0u64;
        loop {
            let read = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Read failed for {} after {} bytes, skipping: {}", entry.path.display(), written, e);
                    self.zip.abort_file()?;
                    self.entries_skipped += 1;
                    return Ok(EntryOutcome::Skipped(e.to_string()));
                }
            };
            self.zip.write_all(&self.buffer[..read])?;
            written += read as u64;
        }

        self.bytes_processed += written;
        self.entries_committed += 1;
        debug!("Archived {} ({} bytes)", entry.archive_name(), written);
        Ok(EntryOutcome::Written(written))
    }

    /// Write the central directory and flush the file to disk.
    pub fn finish(self) -> Result<PathBuf> {
        let file = self.zip.finish()?;
        file.sync_all()?;
        Ok(self.destination)
    }

    /// Drop the writer and delete whatever was written so far.
    pub fn abandon(self) {
        let destination = self.destination.clone();
        drop(self);
        remove_partial(&destination);
    }
}

/// Delete a partially written archive, ignoring a file that is already gone.
fn needs_large_file(walked_size: u64, current_size: u64) -> bool {
    walked_size.max(current_size) >= LARGE_FILE_THRESHOLD
}

pub fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed partial archive {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial archive {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::{walk_directory, WalkOptions};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_writes_all_entries_with_relative_names() -> Result<()> {
        let src = TempDir::new()?;
        let out = TempDir::new()?;
        fs::create_dir(src.path().join("b"))?;
        fs::write(src.path().join("a.txt"), b"0123456789")?;
        fs::write(src.path().join("b/c.txt"), b"01234567890123456789")?;

        let summary = walk_directory(src.path(), &WalkOptions::default())?;
        let destination = out.path().join("backup-test.zip");
        let mut writer = ArchiveWriter::create(&destination, 6)?;
        for entry in &summary.files {
            assert!(matches!(writer.add_entry(entry)?, EntryOutcome::Written(_)));
        }
        assert_eq!(writer.bytes_processed(), 30);
        assert_eq!(writer.entries_committed(), 2);
        writer.finish()?;

        let mut archive = zip::ZipArchive::new(File::open(&destination)?)?;
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive.by_name("b/c.txt")?.read_to_string(&mut content)?;
        assert_eq!(content, "01234567890123456789");
        Ok(())
    }

    #[test]
    fn test_file_grown_since_walk_is_archived_whole() -> Result<()> {
        let src = TempDir::new()?;
        let out = TempDir::new()?;
        fs::write(src.path().join("latest.log"), b"first line\n")?;

        let summary = walk_directory(src.path(), &WalkOptions::default())?;
        fs::write(src.path().join("latest.log"), b"first line\nsecond line\n")?;

        let destination = out.path().join("backup-test.zip");
        let mut writer = ArchiveWriter::create(&destination, 6)?;
        assert_eq!(writer.add_entry(&summary.files[0])?, EntryOutcome::Written(23));
        writer.finish()?;

        let mut archive = zip::ZipArchive::new(File::open(&destination)?)?;
        let mut content = String::new();
        archive.by_name("latest.log")?.read_to_string(&mut content)?;
        assert_eq!(content, "first line\nsecond line\n");
        Ok(())
    }

    #[test]
    fn test_zip64_follows_size_at_open_time() {
        assert!(!needs_large_file(10, 20));
        assert!(needs_large_file(10, LARGE_FILE_THRESHOLD));
        assert!(needs_large_file(LARGE_FILE_THRESHOLD + 1, 0));
    }

    #[test]
    fn test_missing_source_is_skipped() -> Result<()> {
        let out = TempDir::new()?;
        let destination = out.path().join("backup-test.zip");
        let mut writer = ArchiveWriter::create(&destination, 0)?;

        let ghost = FileEntry {
            path: out.path().join("vanished.lock"),
            relative_path: PathBuf::from("vanished.lock"),
            size: 12,
        };
        assert!(matches!(writer.add_entry(&ghost)?, EntryOutcome::Skipped(_)));
        assert_eq!(writer.entries_committed(), 0);
        assert_eq!(writer.entries_skipped(), 1);
        writer.finish()?;

        let archive = zip::ZipArchive::new(File::open(&destination)?)?;
        assert_eq!(archive.len(), 0);
        Ok(())
    }

    #[test]
    fn test_abandon_removes_partial_file() -> Result<()> {
        let out = TempDir::new()?;
        let destination = out.path().join("backup-partial.zip");
        let writer = ArchiveWriter::create(&destination, 6)?;
        assert!(destination.exists());

        writer.abandon();
        assert!(!destination.exists());
        Ok(())
    }
}
