//! Backup orchestrator.
//!
//! [`BackupManager`] is the single entry point for starting, cancelling,
//! listing, deleting and restoring backups. It owns the job registry, hands
//! archival work to the configured [`JobRunner`], and consumes each worker's
//! progress channel in order, updating the status table and forwarding events
//! to the [`EventSink`].

pub mod catalog;
pub mod job_tracker;
pub mod restore;

use crate::archive::ArchiveSidecar;
use crate::config::Config;
use crate::entity::EntityResolver;
use crate::events::{BackupCompletedEvent, BackupProgressEvent, EventSink};
use crate::executor::cancel::CancelHandle;
use crate::executor::message::{channel, CompletedArchive, ProgressReceiver, WorkerMessage};
use crate::executor::runner::JobRunner;
use crate::executor::{ArchiveJobSpec, WorkerExit};
use crate::fs::metadata::ArchiveStat;
use crate::fs::naming::{archive_filename, is_safe_archive_filename, is_store_name};
use crate::models::{BackupEntry, BackupJob, BackupType, JobState, FAILED_PERCENT};
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use catalog::{archive_exists, list_archives};
pub use job_tracker::JobTracker;
pub use restore::{restore_archive, RestoreReport};

/// Tunables the manager passes to every job
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Archive store directory name under each entity root
    pub store_dir: PathBuf,
    pub batch_files: usize,
    pub batch_bytes: u64,
    pub compression_level: u32,
    /// Upper bound for listing and deleting archives
    pub file_op_timeout: Duration,
}

impl ManagerSettings {
    /// Archive store for an entity rooted at `root`.
    pub fn store_dir_for(&self, root: &Path) -> Result<PathBuf> {
        if !is_store_name(&self.store_dir) {
            return Err(BackupError::InvalidStore(self.store_dir.display().to_string()));
        }
        Ok(root.join(&self.store_dir))
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            store_dir: config.archive.store_dir.clone(),
            batch_files: config.archive.batch_files,
            batch_bytes: config.archive.batch_bytes,
            compression_level: config.archive.compression_level,
            file_op_timeout: config.manager.file_op_timeout(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Terminal result of a backup job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(BackupEntry),
    Failed(String),
    Cancelled,
}

/// Acknowledgement of an accepted backup, awaitable for its outcome.
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: String,
    pub entity_id: String,
    pub filename: String,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> JobOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| JobOutcome::Failed("Job driver stopped unexpectedly".to_string()))
    }
}

struct Inner {
    resolver: Arc<dyn EntityResolver>,
    sink: Arc<dyn EventSink>,
    runner: Arc<dyn JobRunner>,
    jobs: JobTracker,
    settings: ManagerSettings,
}

#[derive(Clone)]
pub struct BackupManager {
    inner: Arc<Inner>,
}

impl BackupManager {
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        sink: Arc<dyn EventSink>,
        runner: Arc<dyn JobRunner>,
        settings: ManagerSettings,
    ) -> Self {
        info!("Backup manager using {} runner", runner.name());
        Self {
            inner: Arc::new(Inner {
                resolver,
                sink,
                runner,
                jobs: JobTracker::new(),
                settings,
            }),
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.inner.jobs
    }

    /// Resolve an entity to its root and archive store.
    fn locate(&self, entity_id: &str) -> Result<(PathBuf, PathBuf)> {
        let record = self
            .inner
            .resolver
            .resolve(entity_id)
            .ok_or_else(|| BackupError::EntityNotFound(entity_id.to_string()))?;

        if !record.root_path.is_dir() {
            return Err(BackupError::RootMissing(record.root_path.display().to_string()));
        }

        let store_dir = self.inner.settings.store_dir_for(&record.root_path)?;
        Ok((record.root_path, store_dir))
    }

    /// Start a backup. Returns as soon as the job is registered; progress and
    /// the result arrive through the event sink and the returned ticket.
    ///
    /// Without a name the archive is an automatic backup.
    pub async fn create_backup(&self, entity_id: &str, name: Option<&str>) -> Result<JobTicket> {
        let (root, store_dir) = self.locate(entity_id)?;

        let job_id = Uuid::new_v4().to_string();
        let cancel = CancelHandle::new();
        self.inner
            .jobs
            .try_start(entity_id, &job_id, JobState::Calculating, Some(cancel.clone()))?;

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let now = Utc::now();
        let filename = archive_filename(now, name);
        let (display_name, backup_type) = match name {
            Some(name) => (name.to_string(), BackupType::Manual),
            None => (
                format!("Auto backup {}", now.format("%Y-%m-%d %H:%M")),
                BackupType::Auto,
            ),
        };

        let spec = ArchiveJobSpec {
            job_id: job_id.clone(),
            entity_id: entity_id.to_string(),
            root,
            store_dir,
            filename: filename.clone(),
            display_name,
            backup_type,
            batch_files: self.inner.settings.batch_files,
            batch_bytes: self.inner.settings.batch_bytes,
            compression_level: self.inner.settings.compression_level,
        };

        let (sender, receiver) = channel();
        let handle = self.inner.runner.run(spec, sender, cancel.clone());
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!(entity_id = %entity_id, job_id = %job_id, "Started {} backup {}", backup_type, filename);

        tokio::spawn(drive_job(
            self.inner.clone(),
            entity_id.to_string(),
            job_id.clone(),
            receiver,
            handle,
            cancel,
            outcome_tx,
        ));

        Ok(JobTicket {
            job_id,
            entity_id: entity_id.to_string(),
            filename,
            outcome: outcome_rx,
        })
    }

    /// Signal the entity's running backup to stop. Returns false if nothing
    /// cancellable is running, including a job that is already finalizing.
    pub fn cancel_backup(&self, entity_id: &str) -> bool {
        let cancelled = self.inner.jobs.cancel(entity_id);
        if cancelled {
            info!(entity_id = %entity_id, "Backup cancelled");
        } else {
            debug!(entity_id = %entity_id, "No cancellable backup running");
        }
        cancelled
    }

    pub fn get_backup_status(&self, entity_id: &str) -> Option<BackupJob> {
        self.inner.jobs.status(entity_id)
    }

    /// Whether a backup (not a restore) is in flight for the entity.
    pub fn is_backup_in_progress(&self, entity_id: &str) -> bool {
        self.inner
            .jobs
            .status(entity_id)
            .is_some_and(|job| job.is_backup_running())
    }

    /// Whether any job, backup or restore, holds the entity's slot.
    pub fn has_active_job(&self, entity_id: &str) -> bool {
        self.inner.jobs.is_active(entity_id)
    }

    pub async fn list_backups(&self, entity_id: &str) -> Result<Vec<BackupEntry>> {
        let (_, store_dir) = self.locate(entity_id)?;
        self.bounded("list backups", move || list_archives(&store_dir))
            .await
    }

    /// Delete an archive and its sidecar.
    pub async fn delete_backup(&self, entity_id: &str, filename: &str) -> Result<()> {
        if !is_safe_archive_filename(filename) {
            return Err(BackupError::InvalidFilename(filename.to_string()));
        }
        let (_, store_dir) = self.locate(entity_id)?;
        let path = store_dir.join(filename);
        let label = filename.to_string();

        self.bounded("delete backup", move || {
            if !path.is_file() {
                return Err(BackupError::ArchiveNotFound(label));
            }
            std::fs::remove_file(&path)?;
            match std::fs::remove_file(ArchiveSidecar::path_for(&path)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove sidecar for {}: {}", path.display(), e),
            }
            Ok(())
        })
        .await?;

        info!(entity_id = %entity_id, "Deleted backup {}", filename);
        Ok(())
    }

    /// Replace the entity's working tree with the contents of an archive.
    ///
    /// Holds the entity's job slot for its duration, so it is rejected while a
    /// backup is running and blocks new backups until it finishes.
    pub async fn restore_backup(&self, entity_id: &str, filename: &str) -> Result<RestoreReport> {
        if !is_safe_archive_filename(filename) {
            return Err(BackupError::InvalidFilename(filename.to_string()));
        }
        let (root, store_dir) = self.locate(entity_id)?;
        let archive_path = store_dir.join(filename);
        if !archive_exists(&store_dir, filename) {
            return Err(BackupError::ArchiveNotFound(filename.to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        self.inner
            .jobs
            .try_start(entity_id, &job_id, JobState::Restoring, None)?;

        info!(entity_id = %entity_id, "Restoring {}", filename);
        let result =
            tokio::task::spawn_blocking(move || restore_archive(&root, &store_dir, &archive_path)).await;
        self.inner.jobs.release(entity_id, &job_id);

        match result {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                error!(entity_id = %entity_id, "Restore of {} failed: {}", filename, e);
                Err(e)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel every running backup and wait up to `grace` for the slots to
    /// drain.
    pub async fn shutdown(&self, grace: Duration) {
        let signalled = self.inner.jobs.cancel_all();
        if signalled > 0 {
            info!("Cancelled {} running backup(s)", signalled);
        }

        let wait = async {
            while self.inner.jobs.running_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            warn!(
                "{} job(s) still running after {:?}",
                self.inner.jobs.running_count(),
                grace
            );
        }
    }

    /// Run a blocking filesystem operation with the configured time bound.
    async fn bounded<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let timeout = self.inner.settings.file_op_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(op)).await {
            Ok(joined) => joined?,
            Err(_) => Err(BackupError::Timeout(format!("{what} exceeded {timeout:?}"))),
        }
    }
}

/// Consume one job's progress channel until the worker exits.
async fn drive_job(
    inner: Arc<Inner>,
    entity_id: String,
    job_id: String,
    mut receiver: ProgressReceiver,
    handle: JoinHandle<WorkerExit>,
    cancel: CancelHandle,
    outcome_tx: oneshot::Sender<JobOutcome>,
) {
    let mut outcome = None;

    while let Some(message) = receiver.recv().await {
        match message {
            WorkerMessage::Progress(update) => {
                if inner.jobs.apply_progress(&entity_id, &job_id, &update) {
                    inner.sink.on_backup_progress(BackupProgressEvent {
                        entity_id: entity_id.clone(),
                        percent: update.percent,
                        stage: update.stage,
                        processed_files: update.processed_files,
                        total_files: update.total_files,
                        error: None,
                    });
                }
            }
            WorkerMessage::Complete(archive) => {
                let entry = completed_entry(archive);
                if inner.jobs.complete(&entity_id, &job_id).is_some() {
                    inner.sink.on_backup_completed(BackupCompletedEvent {
                        entity_id: entity_id.clone(),
                        entry: entry.clone(),
                    });
                }
                outcome = Some(JobOutcome::Completed(entry));
            }
            WorkerMessage::Error { message } => {
                // A worker can still trip over its own teardown after the
                // slot was already recorded as cancelled.
                let reported = report_failure(&inner, &entity_id, &job_id, &message);
                outcome = Some(if !reported && cancel.is_cancelled() {
                    debug!(entity_id = %entity_id, job_id = %job_id, "Error after cancel: {}", message);
                    JobOutcome::Cancelled
                } else {
                    JobOutcome::Failed(message)
                });
            }
            WorkerMessage::Log { text } => {
                debug!(entity_id = %entity_id, job_id = %job_id, "{}", text);
            }
        }
    }

    let outcome = match (outcome, handle.await) {
        (Some(outcome), _) => outcome,
        (None, Ok(WorkerExit::Cancelled)) => {
            inner.jobs.finish_cancelled(&entity_id, &job_id);
            JobOutcome::Cancelled
        }
        (None, Ok(exit)) => {
            let message = format!("Worker exited ({exit:?}) without reporting a result");
            report_failure(&inner, &entity_id, &job_id, &message);
            JobOutcome::Failed(message)
        }
        (None, Err(e)) => {
            error!(entity_id = %entity_id, job_id = %job_id, "Backup worker crashed: {}", e);
            let message = format!("Backup worker crashed: {e}");
            report_failure(&inner, &entity_id, &job_id, &message);
            JobOutcome::Failed(message)
        }
    };

    let _ = outcome_tx.send(outcome);
}

/// Record a failure and emit the sentinel event. Returns false if the job no
/// longer owned its slot.
fn report_failure(inner: &Inner, entity_id: &str, job_id: &str, message: &str) -> bool {
    let Some(status) = inner.jobs.fail(entity_id, job_id, message) else {
        return false;
    };
    inner.sink.on_backup_progress(BackupProgressEvent {
        entity_id: entity_id.to_string(),
        percent: FAILED_PERCENT,
        stage: JobState::Error,
        processed_files: Some(status.processed_files),
        total_files: Some(status.total_files),
        error: Some(message.to_string()),
    });
    true
}

fn completed_entry(archive: CompletedArchive) -> BackupEntry {
    let created_at = ArchiveStat::from_path(&archive.path)
        .map(|stat| stat.created_at)
        .unwrap_or_else(|_| Utc::now());

    BackupEntry {
        name: archive.name,
        filename: archive.filename,
        path: archive.path,
        size: archive.size,
        created_at,
        backup_type: archive.backup_type,
    }
}
