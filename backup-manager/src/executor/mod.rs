//! Archival worker - walks an entity root and writes one archive.
//!
//! The worker is a step-driven state machine:
//! `Calculating -> Archiving -> Finalizing -> Complete`, with `Error` from any
//! non-terminal stage and `Cancelled` from scanning or archiving. Each call to
//! [`ArchivalWorker::step`] does a bounded amount of work, so the same machine
//! can run to completion on a blocking thread or interleave with other tasks
//! on an async runtime (see [`runner`]).
//!
//! The archive is written to `<filename>.part` and renamed once it is
//! complete; every failure or cancellation exit removes the partial file.

pub mod cancel;
pub mod message;
pub mod progress;
pub mod runner;

use crate::archive::codec::remove_partial;
use crate::archive::{ArchiveSidecar, ArchiveWriter, EntryOutcome};
use crate::fs::metadata::ArchiveStat;
use crate::fs::walker::{walk_directory, FileEntry, WalkOptions};
use crate::models::{BackupType, JobState};
use crate::utils::errors::BackupError;
use cancel::CancelHandle;
use chrono::Utc;
use message::{CompletedArchive, ProgressSender, ProgressUpdate, WorkerMessage};
use progress::{format_bytes, format_duration, ProgressTracker, ARCHIVING_CEILING, COMPLETE_PERCENT};
use std::path::PathBuf;
use tracing::{info, warn};

/// Suffix of an archive that is still being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Everything a worker needs to produce one archive
#[derive(Debug, Clone)]
pub struct ArchiveJobSpec {
    pub job_id: String,
    pub entity_id: String,
    pub root: PathBuf,
    pub store_dir: PathBuf,
    pub filename: String,
    pub display_name: String,
    pub backup_type: BackupType,
    /// Upper bound on files handled per step
    pub batch_files: usize,
    /// Upper bound on source bytes handled per step
    pub batch_bytes: u64,
    pub compression_level: u32,
}

impl ArchiveJobSpec {
    pub fn destination(&self) -> PathBuf {
        self.store_dir.join(&self.filename)
    }

    pub fn partial_destination(&self) -> PathBuf {
        self.store_dir.join(format!("{}{}", self.filename, PARTIAL_SUFFIX))
    }
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Failed,
    Cancelled,
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(WorkerExit),
}

enum Phase {
    Calculating,
    Archiving {
        files: Vec<FileEntry>,
        next: usize,
        writer: ArchiveWriter,
        tracker: ProgressTracker,
    },
    Done(WorkerExit),
}

pub struct ArchivalWorker {
    spec: ArchiveJobSpec,
    sender: ProgressSender,
    cancel: CancelHandle,
    phase: Phase,
}

impl ArchivalWorker {
    pub fn new(spec: ArchiveJobSpec, sender: ProgressSender, cancel: CancelHandle) -> Self {
        Self {
            spec,
            sender,
            cancel,
            phase: Phase::Calculating,
        }
    }

    /// Advance the state machine by one bounded unit of work.
    pub fn step(&mut self) -> Step {
        match std::mem::replace(&mut self.phase, Phase::Done(WorkerExit::Failed)) {
            Phase::Calculating => self.calculate(),
            Phase::Archiving {
                files,
                next,
                writer,
                tracker,
            } => {
                if self.cancel.is_cancelled() {
                    writer.abandon();
                    return self.finish(WorkerExit::Cancelled);
                }
                if next < files.len() {
                    self.archive_batch(files, next, writer, tracker)
                } else {
                    self.finalize(writer, tracker)
                }
            }
            Phase::Done(exit) => {
                self.phase = Phase::Done(exit);
                Step::Finished(exit)
            }
        }
    }

    /// Drive the worker until it finishes.
    pub fn run_to_completion(mut self) -> WorkerExit {
        loop {
            if let Step::Finished(exit) = self.step() {
                return exit;
            }
        }
    }

    fn calculate(&mut self) -> Step {
        if self.cancel.is_cancelled() {
            return self.finish(WorkerExit::Cancelled);
        }

        let options = WalkOptions::excluding(&self.spec.store_dir);
        let summary = match walk_directory(&self.spec.root, &options) {
            Ok(summary) => summary,
            Err(e) => {
                return self.fail(format!("Failed to scan {}: {}", self.spec.root.display(), e));
            }
        };

        if summary.files.is_empty() {
            return self.fail(BackupError::EmptyTree(self.spec.root.display().to_string()));
        }

        let total_files = summary.total_files();
        let total_bytes = summary.total_bytes;
        self.sender.log(format!(
            "Found {} files ({}), {} entries skipped",
            total_files,
            format_bytes(total_bytes),
            summary.skipped
        ));

        let mut tracker = ProgressTracker::new(total_files, total_bytes);
        self.emit(&tracker, 0, JobState::Calculating);

        if self.cancel.is_cancelled() {
            return self.finish(WorkerExit::Cancelled);
        }

        if let Err(e) = std::fs::create_dir_all(&self.spec.store_dir) {
            return self.fail(format!(
                "Failed to create archive store {}: {}",
                self.spec.store_dir.display(),
                e
            ));
        }

        let partial = self.spec.partial_destination();
        let writer = match ArchiveWriter::create(&partial, self.spec.compression_level) {
            Ok(writer) => writer,
            Err(e) => {
                remove_partial(&partial);
                return self.fail(format!("Failed to create archive: {e}"));
            }
        };

        tracker.mark_emitted(0);
        self.phase = Phase::Archiving {
            files: summary.files,
            next: 0,
            writer,
            tracker,
        };
        Step::Continue
    }

    fn archive_batch(
        &mut self,
        files: Vec<FileEntry>,
        mut next: usize,
        mut writer: ArchiveWriter,
        mut tracker: ProgressTracker,
    ) -> Step {
        let batch_files = self.spec.batch_files.max(1);
        let mut batch_count = 0usize;
        let mut batch_bytes = 0u64;

        while next < files.len() && batch_count < batch_files && batch_bytes < self.spec.batch_bytes {
            let entry = &files[next];
            match writer.add_entry(entry) {
                Ok(EntryOutcome::Written(bytes)) => {
                    tracker.record_file(bytes);
                    batch_bytes += bytes;
                }
                Ok(EntryOutcome::Skipped(reason)) => {
                    self.sender
                        .log(format!("Skipped {}: {}", entry.relative_path.display(), reason));
                    tracker.record_file(entry.size);
                    batch_bytes += entry.size;
                }
                Err(e) => {
                    writer.abandon();
                    return self.fail(format!(
                        "Failed writing {} to archive: {}",
                        entry.relative_path.display(),
                        e
                    ));
                }
            }
            next += 1;
            batch_count += 1;
        }

        if let Some(percent) = tracker.next_event() {
            self.emit(&tracker, percent, JobState::Archiving);
        }

        self.phase = Phase::Archiving {
            files,
            next,
            writer,
            tracker,
        };
        Step::Continue
    }

    fn finalize(&mut self, writer: ArchiveWriter, mut tracker: ProgressTracker) -> Step {
        if !self.cancel.begin_finalizing() {
            writer.abandon();
            return self.finish(WorkerExit::Cancelled);
        }

        tracker.mark_emitted(ARCHIVING_CEILING);
        self.emit(&tracker, ARCHIVING_CEILING, JobState::Finalizing);

        let committed = writer.entries_committed();
        let partial = writer.destination().to_path_buf();
        if let Err(e) = writer.finish() {
            remove_partial(&partial);
            return self.fail(format!("Failed to finalize archive: {e}"));
        }

        if committed == 0 {
            remove_partial(&partial);
            return self.fail(BackupError::Unreadable(self.spec.root.display().to_string()));
        }

        let destination = self.spec.destination();
        if let Err(e) = std::fs::rename(&partial, &destination) {
            remove_partial(&partial);
            return self.fail(format!("Failed to move archive into place: {e}"));
        }

        let stat = match ArchiveStat::from_path(&destination) {
            Ok(stat) if stat.size > 0 => stat,
            Ok(_) => {
                remove_partial(&destination);
                return self.fail(BackupError::Verification("archive is empty".to_string()));
            }
            Err(e) => {
                remove_partial(&destination);
                return self.fail(BackupError::Verification(e.to_string()));
            }
        };

        let sidecar = ArchiveSidecar {
            version: ArchiveSidecar::VERSION,
            name: self.spec.display_name.clone(),
            backup_type: self.spec.backup_type,
            created_at: Utc::now(),
            job_id: self.spec.job_id.clone(),
            total_files: tracker.total_files,
            total_bytes: tracker.total_bytes,
        };
        if let Err(e) = sidecar.write(&destination) {
            warn!("Failed to write sidecar for {}: {}", destination.display(), e);
        }

        info!(
            entity_id = %self.spec.entity_id,
            "Archive {} finalized: {} files, {} in {} ({}/s)",
            self.spec.filename,
            committed,
            format_bytes(stat.size),
            format_duration(tracker.elapsed().as_secs()),
            format_bytes(tracker.average_speed())
        );

        tracker.mark_emitted(COMPLETE_PERCENT);
        self.emit(&tracker, COMPLETE_PERCENT, JobState::Complete);
        self.sender.send(WorkerMessage::Complete(CompletedArchive {
            filename: self.spec.filename.clone(),
            path: destination,
            size: stat.size,
            name: self.spec.display_name.clone(),
            backup_type: self.spec.backup_type,
        }));

        self.finish(WorkerExit::Completed)
    }

    fn emit(&self, tracker: &ProgressTracker, percent: i32, stage: JobState) {
        self.sender.send(WorkerMessage::Progress(ProgressUpdate {
            percent,
            stage,
            processed_files: Some(tracker.processed_files),
            total_files: Some(tracker.total_files),
            processed_bytes: tracker.processed_bytes,
            total_bytes: tracker.total_bytes,
        }));
    }

    fn fail(&mut self, error: impl std::fmt::Display) -> Step {
        let message = error.to_string();
        warn!(entity_id = %self.spec.entity_id, job_id = %self.spec.job_id, "Backup failed: {}", message);
        self.sender.send(WorkerMessage::Error { message });
        self.finish(WorkerExit::Failed)
    }

    fn finish(&mut self, exit: WorkerExit) -> Step {
        if exit == WorkerExit::Cancelled {
            self.sender.log("Cancelled");
        }
        self.phase = Phase::Done(exit);
        Step::Finished(exit)
    }
}
