//! Auto-backup sweep.
//!
//! [`AutoBackupScheduler::tick`] checks every entity's policy and starts an
//! automatic backup where one is due. [`SweepClock`] calls it on a cron
//! schedule.

use crate::entity::PolicyStore;
use crate::manager::{BackupManager, JobOutcome, JobTicket};
use crate::utils::errors::BackupError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

pub struct AutoBackupScheduler {
    manager: BackupManager,
    policies: Arc<dyn PolicyStore>,
    /// Entity id to job id of automatic runs not yet recorded
    pending: Arc<DashMap<String, String>>,
}

impl AutoBackupScheduler {
    pub fn new(manager: BackupManager, policies: Arc<dyn PolicyStore>) -> Self {
        Self {
            manager,
            policies,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Run one sweep now. Returns the entities a backup was started for.
    pub async fn tick(&self) -> Vec<String> {
        self.tick_at(Utc::now()).await
    }

    /// Run one sweep as of `now`.
    ///
    /// An entity that already has a job, or whose previous automatic backup
    /// has not been recorded yet, is skipped silently.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut started = Vec::new();

        for (entity_id, policy) in self.policies.policies() {
            if !policy.is_due(now) {
                continue;
            }
            if self.manager.has_active_job(&entity_id) {
                debug!(entity_id = %entity_id, "Skipping auto backup: job already running");
                continue;
            }

            match self.pending.entry(entity_id.clone()) {
                Entry::Occupied(previous) => {
                    debug!(
                        entity_id = %entity_id,
                        job_id = %previous.get(),
                        "Skipping auto backup: previous run not recorded yet"
                    );
                    continue;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(String::new());
                }
            }

            match self.manager.create_backup(&entity_id, None).await {
                Ok(ticket) => {
                    info!(entity_id = %entity_id, job_id = %ticket.job_id, "Starting scheduled backup");
                    self.pending.insert(entity_id.clone(), ticket.job_id.clone());
                    tokio::spawn(record_on_completion(
                        ticket,
                        self.policies.clone(),
                        self.pending.clone(),
                    ));
                    started.push(entity_id);
                }
                Err(BackupError::AlreadyRunning(_)) => {
                    self.pending.remove(&entity_id);
                    debug!(entity_id = %entity_id, "Skipping auto backup: job already running");
                }
                Err(e) => {
                    self.pending.remove(&entity_id);
                    warn!(entity_id = %entity_id, error = %e, "Scheduled backup could not start");
                }
            }
        }

        started
    }
}

/// Persist `lastBackupAt` once the job completes; other outcomes leave the
/// policy due so the next sweep retries.
async fn record_on_completion(
    ticket: JobTicket,
    policies: Arc<dyn PolicyStore>,
    pending: Arc<DashMap<String, String>>,
) {
    let entity_id = ticket.entity_id.clone();

    match ticket.wait().await {
        JobOutcome::Completed(entry) => {
            let at = Utc::now();
            let store = policies.clone();
            let id = entity_id.clone();
            match tokio::task::spawn_blocking(move || store.record_backup(&id, at)).await {
                Ok(Ok(())) => info!(entity_id = %entity_id, "Scheduled backup {} complete", entry.filename),
                Ok(Err(e)) => error!(entity_id = %entity_id, error = %e, "Failed to record backup time"),
                Err(e) => error!(entity_id = %entity_id, error = %e, "Failed to record backup time"),
            }
        }
        JobOutcome::Failed(message) => {
            warn!(entity_id = %entity_id, error = %message, "Scheduled backup failed");
        }
        JobOutcome::Cancelled => {
            info!(entity_id = %entity_id, "Scheduled backup cancelled");
        }
    }

    pending.remove(&entity_id);
}

/// Cron clock that drives [`AutoBackupScheduler::tick`].
pub struct SweepClock {
    scheduler: Mutex<JobScheduler>,
}

impl SweepClock {
    /// Schedule the sweep on `cron_expression` (six fields, seconds first)
    /// and start the clock.
    pub async fn start(cron_expression: &str, sweeper: Arc<AutoBackupScheduler>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                let started = sweeper.tick().await;
                if !started.is_empty() {
                    info!(count = started.len(), "Auto-backup sweep started jobs");
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        info!(cron = %cron_expression, "Auto-backup sweep scheduled");

        Ok(Self {
            scheduler: Mutex::new(scheduler),
        })
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StaticEntities;
    use crate::events::NullSink;
    use crate::executor::runner::ThreadRunner;
    use crate::manager::ManagerSettings;
    use crate::models::BackupPolicy;
    use crate::utils::errors::Result;
    use chrono::Duration;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryPolicies {
        policies: std::sync::Mutex<HashMap<String, BackupPolicy>>,
    }

    impl MemoryPolicies {
        fn with(entity_id: &str, policy: BackupPolicy) -> Arc<Self> {
            let store = Self::default();
            store.policies.lock().unwrap().insert(entity_id.to_string(), policy);
            Arc::new(store)
        }

        fn last_backup_at(&self, entity_id: &str) -> Option<DateTime<Utc>> {
            self.policies.lock().unwrap().get(entity_id).and_then(|p| p.last_backup_at)
        }
    }

    impl PolicyStore for MemoryPolicies {
        fn policies(&self) -> Vec<(String, BackupPolicy)> {
            self.policies
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }

        fn record_backup(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
            if let Some(policy) = self.policies.lock().unwrap().get_mut(entity_id) {
                policy.last_backup_at = Some(at);
            }
            Ok(())
        }
    }

    fn setup(policy: BackupPolicy) -> (TempDir, BackupManager, Arc<MemoryPolicies>) {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("level.dat"), b"level").unwrap();
        let manager = BackupManager::new(
            Arc::new(StaticEntities::new([("srv", root.path())])),
            Arc::new(NullSink),
            Arc::new(ThreadRunner),
            ManagerSettings::default(),
        );
        let policies = MemoryPolicies::with("srv", policy);
        (root, manager, policies)
    }

    async fn wait_until_recorded(policies: &MemoryPolicies) {
        for _ in 0..200 {
            if policies.last_backup_at("srv").is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("backup time was never recorded");
    }

    #[tokio::test]
    async fn test_disabled_and_recent_policies_do_nothing() {
        let (_root, manager, policies) = setup(BackupPolicy::default());
        let scheduler = AutoBackupScheduler::new(manager.clone(), policies);
        assert!(scheduler.tick().await.is_empty());

        let (_root, manager, policies) = setup(BackupPolicy {
            enabled: true,
            interval_hours: 24,
            last_backup_at: Some(Utc::now() - Duration::hours(1)),
        });
        let scheduler = AutoBackupScheduler::new(manager, policies);
        assert!(scheduler.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_due_policy_starts_auto_backup_and_records_completion() {
        let (root, manager, policies) = setup(BackupPolicy {
            enabled: true,
            interval_hours: 24,
            last_backup_at: None,
        });
        let scheduler = AutoBackupScheduler::new(manager.clone(), policies.clone());

        assert_eq!(scheduler.tick().await, vec!["srv".to_string()]);
        wait_until_recorded(&policies).await;

        let backups = manager.list_backups("srv").await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_type, crate::models::BackupType::Auto);
        assert!(root.path().join("backups").join(&backups[0].filename).exists());

        assert!(scheduler.tick().await.is_empty());

        for _ in 0..200 {
            if scheduler.pending.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!manager.has_active_job("srv"));
        let first = policies.last_backup_at("srv");
        assert_eq!(
            scheduler.tick_at(Utc::now() + Duration::hours(25)).await,
            vec!["srv".to_string()]
        );

        for _ in 0..200 {
            if policies.last_backup_at("srv") > first {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(policies.last_backup_at("srv") > first);
        assert_eq!(manager.list_backups("srv").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skips_entity_with_running_job() {
        let (_root, manager, policies) = setup(BackupPolicy {
            enabled: true,
            interval_hours: 1,
            last_backup_at: None,
        });
        manager
            .jobs()
            .try_start("srv", "restore", crate::models::JobState::Restoring, None)
            .unwrap();

        let scheduler = AutoBackupScheduler::new(manager, policies.clone());
        assert!(scheduler.tick().await.is_empty());
        assert!(policies.last_backup_at("srv").is_none());
    }
}
