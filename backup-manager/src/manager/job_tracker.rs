//! Per-entity job registry and status table.

use crate::executor::cancel::{CancelHandle, CancelRequest};
use crate::executor::message::ProgressUpdate;
use crate::executor::progress::COMPLETE_PERCENT;
use crate::models::{BackupJob, JobState};
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

struct JobSlot {
    status: BackupJob,
    /// None for jobs that cannot be cancelled (restores).
    cancel: Option<CancelHandle>,
}

/// Tracks the in-flight job of every entity and the last terminal status.
///
/// Every transition is keyed by job id, so a late message from a job that was
/// already cancelled can never touch the slot of its successor.
#[derive(Clone, Default)]
pub struct JobTracker {
    active: Arc<DashMap<String, JobSlot>>,
    last: Arc<DashMap<String, BackupJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the slot for `entity_id`.
    pub fn try_start(
        &self,
        entity_id: &str,
        job_id: &str,
        state: JobState,
        cancel: Option<CancelHandle>,
    ) -> Result<BackupJob> {
        match self.active.entry(entity_id.to_string()) {
            Entry::Occupied(_) => Err(BackupError::AlreadyRunning(entity_id.to_string())),
            Entry::Vacant(vacant) => {
                let status = BackupJob::new(job_id, entity_id, state);
                vacant.insert(JobSlot {
                    status: status.clone(),
                    cancel,
                });
                if state != JobState::Restoring {
                    self.last.remove(entity_id);
                }
                Ok(status)
            }
        }
    }

    /// Current job, or the last terminal snapshot if nothing is running.
    pub fn status(&self, entity_id: &str) -> Option<BackupJob> {
        if let Some(slot) = self.active.get(entity_id) {
            return Some(slot.status.clone());
        }
        self.last.get(entity_id).map(|job| job.clone())
    }

    pub fn is_active(&self, entity_id: &str) -> bool {
        self.active.contains_key(entity_id)
    }

    /// Apply a progress message. Percent never moves backwards and a terminal
    /// stage is left to [`complete`](Self::complete), which also frees the
    /// slot. Returns false if `job_id` no longer owns the slot.
    pub fn apply_progress(&self, entity_id: &str, job_id: &str, update: &ProgressUpdate) -> bool {
        let Some(mut slot) = self.active.get_mut(entity_id) else {
            return false;
        };
        if slot.status.job_id != job_id || slot.status.state.is_terminal() {
            return false;
        }

        let status = &mut slot.status;
        if !update.stage.is_terminal() {
            status.state = update.stage;
        }
        status.percent = status.percent.max(update.percent);
        if let Some(processed) = update.processed_files {
            status.processed_files = processed;
        }
        if let Some(total) = update.total_files {
            status.total_files = total;
        }
        status.processed_bytes = update.processed_bytes;
        status.total_bytes = update.total_bytes;
        status.updated_at = Utc::now();
        true
    }

    pub fn complete(&self, entity_id: &str, job_id: &str) -> Option<BackupJob> {
        self.finish(entity_id, job_id, |status| {
            status.state = JobState::Complete;
            status.percent = COMPLETE_PERCENT;
            status.updated_at = Utc::now();
        })
    }

    pub fn fail(&self, entity_id: &str, job_id: &str, message: &str) -> Option<BackupJob> {
        self.finish(entity_id, job_id, |status| status.mark_failed(message))
    }

    /// Record a cancellation that was not requested through [`cancel`](Self::cancel).
    pub fn finish_cancelled(&self, entity_id: &str, job_id: &str) -> Option<BackupJob> {
        self.finish(entity_id, job_id, BackupJob::mark_cancelled)
    }

    /// Signal the running job and free the slot immediately.
    ///
    /// Returns false if nothing is running, the job cannot be cancelled, or it
    /// has already entered finalizing.
    pub fn cancel(&self, entity_id: &str) -> bool {
        let (job_id, handle) = {
            let Some(slot) = self.active.get(entity_id) else {
                return false;
            };
            if !slot.status.state.is_cancellable() {
                return false;
            }
            match &slot.cancel {
                Some(handle) => (slot.status.job_id.clone(), handle.clone()),
                None => return false,
            }
        };

        match handle.cancel() {
            CancelRequest::Signalled => {
                self.finish_cancelled(entity_id, &job_id);
                true
            }
            CancelRequest::AlreadyCancelled | CancelRequest::TooLate => false,
        }
    }

    /// Drop a slot without recording a terminal status.
    pub fn release(&self, entity_id: &str, job_id: &str) -> bool {
        self.active
            .remove_if(entity_id, |_, slot| slot.status.job_id == job_id)
            .is_some()
    }

    pub fn running_count(&self) -> usize {
        self.active.len()
    }

    /// Signal every cancellable job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<CancelHandle> = self
            .active
            .iter()
            .filter_map(|slot| slot.cancel.clone())
            .collect();

        handles
            .iter()
            .filter(|handle| handle.cancel() == CancelRequest::Signalled)
            .count()
    }

    fn finish<F>(&self, entity_id: &str, job_id: &str, apply: F) -> Option<BackupJob>
    where
        F: FnOnce(&mut BackupJob),
    {
        let status = {
            let mut slot = self.active.get_mut(entity_id)?;
            if slot.status.job_id != job_id || slot.status.state.is_terminal() {
                return None;
            }
            apply(&mut slot.status);
            slot.status.clone()
        };

        // Record before freeing the slot so a status read always finds the job.
        self.last.insert(entity_id.to_string(), status.clone());
        self.active
            .remove_if(entity_id, |_, slot| slot.status.job_id == job_id);
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(percent: i32, stage: JobState) -> ProgressUpdate {
        ProgressUpdate {
            percent,
            stage,
            processed_files: Some(1),
            total_files: Some(2),
            processed_bytes: 10,
            total_bytes: 30,
        }
    }

    #[test]
    fn test_second_start_is_rejected() {
        let tracker = JobTracker::new();
        tracker.try_start("a", "job-1", JobState::Calculating, None).unwrap();
        assert!(matches!(
            tracker.try_start("a", "job-2", JobState::Calculating, None),
            Err(BackupError::AlreadyRunning(_))
        ));
        assert!(tracker.try_start("b", "job-3", JobState::Calculating, None).is_ok());
        assert_eq!(tracker.running_count(), 2);
    }

    #[test]
    fn test_concurrent_starts_accept_exactly_one() {
        let tracker = JobTracker::new();
        let accepted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let tracker = tracker.clone();
                    scope.spawn(move || {
                        tracker
                            .try_start("a", &format!("job-{i}"), JobState::Calculating, None)
                            .is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_progress_is_monotonic_and_keyed_by_job() {
        let tracker = JobTracker::new();
        tracker.try_start("a", "job-1", JobState::Calculating, None).unwrap();

        assert!(tracker.apply_progress("a", "job-1", &update(40, JobState::Archiving)));
        assert!(tracker.apply_progress("a", "job-1", &update(30, JobState::Archiving)));
        assert_eq!(tracker.status("a").unwrap().percent, 40);

        assert!(!tracker.apply_progress("a", "stale", &update(90, JobState::Archiving)));
        assert_eq!(tracker.status("a").unwrap().percent, 40);
    }

    #[test]
    fn test_final_progress_leaves_slot_to_complete() {
        let tracker = JobTracker::new();
        tracker.try_start("a", "job-1", JobState::Calculating, None).unwrap();
        assert!(tracker.apply_progress("a", "job-1", &update(95, JobState::Finalizing)));
        assert!(tracker.apply_progress("a", "job-1", &update(100, JobState::Complete)));

        let status = tracker.status("a").unwrap();
        assert_eq!(status.state, JobState::Finalizing);
        assert_eq!(status.percent, 100);
        assert!(tracker.is_active("a"));

        let done = tracker.complete("a", "job-1").unwrap();
        assert_eq!(done.state, JobState::Complete);
        assert!(!tracker.is_active("a"));
        assert!(tracker.try_start("a", "job-2", JobState::Calculating, None).is_ok());
    }

    #[test]
    fn test_terminal_status_is_retained_until_next_start() {
        let tracker = JobTracker::new();
        tracker.try_start("a", "job-1", JobState::Calculating, None).unwrap();
        let failed = tracker.fail("a", "job-1", "disk full").unwrap();

        assert_eq!(failed.percent, -1);
        assert!(!tracker.is_active("a"));
        assert_eq!(tracker.status("a").unwrap().state, JobState::Error);

        tracker.try_start("a", "job-2", JobState::Calculating, None).unwrap();
        assert_eq!(tracker.status("a").unwrap().job_id, "job-2");
    }

    #[test]
    fn test_cancel_frees_slot() {
        let tracker = JobTracker::new();
        let handle = CancelHandle::new();
        tracker
            .try_start("a", "job-1", JobState::Archiving, Some(handle.clone()))
            .unwrap();

        assert!(tracker.cancel("a"));
        assert!(handle.is_cancelled());
        assert!(!tracker.is_active("a"));
        assert_eq!(tracker.status("a").unwrap().state, JobState::Cancelled);
        assert!(!tracker.cancel("a"));
    }

    #[test]
    fn test_cancel_refused_while_finalizing() {
        let tracker = JobTracker::new();
        let handle = CancelHandle::new();
        tracker
            .try_start("a", "job-1", JobState::Archiving, Some(handle.clone()))
            .unwrap();
        assert!(handle.begin_finalizing());

        assert!(!tracker.cancel("a"));
        assert!(tracker.is_active("a"));
    }

    #[test]
    fn test_restore_slot_is_not_cancellable() {
        let tracker = JobTracker::new();
        tracker.try_start("a", "restore-1", JobState::Restoring, None).unwrap();
        assert!(!tracker.cancel("a"));
        assert_eq!(tracker.status("a").unwrap().state, JobState::Restoring);
        assert!(tracker.release("a", "restore-1"));
        assert!(tracker.status("a").is_none());
    }
}
