//! Persistence of auto-backup policies.

use crate::models::BackupPolicy;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Source of per-entity policies for the auto-backup sweep.
pub trait PolicyStore: Send + Sync {
    /// Snapshot of every entity's current policy.
    fn policies(&self) -> Vec<(String, BackupPolicy)>;

    /// Persist the time of a completed automatic backup.
    fn record_backup(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// On-disk part of the store; the policies themselves come from config.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyState {
    #[serde(default)]
    last_backup_at: BTreeMap<String, DateTime<Utc>>,
}

/// Policies from configuration, with `lastBackupAt` kept in a JSON file.
#[derive(Debug)]
pub struct FilePolicyStore {
    path: PathBuf,
    policies: Mutex<BTreeMap<String, BackupPolicy>>,
}

impl FilePolicyStore {
    /// Merge configured policies with the timestamps recorded in `path`.
    /// A missing state file is treated as empty.
    pub fn load<I>(path: impl Into<PathBuf>, configured: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BackupPolicy)>,
    {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<PolicyState>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PolicyState::default(),
            Err(e) => return Err(e.into()),
        };

        let mut policies: BTreeMap<String, BackupPolicy> = configured.into_iter().collect();
        for (entity_id, at) in state.last_backup_at {
            match policies.get_mut(&entity_id) {
                Some(policy) => policy.last_backup_at = Some(at),
                None => warn!(entity_id = %entity_id, "Dropping recorded backup time for unknown entity"),
            }
        }

        info!("Loaded {} backup policies from {}", policies.len(), path.display());
        Ok(Self {
            path,
            policies: Mutex::new(policies),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BackupPolicy>> {
        self.policies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, policies: &BTreeMap<String, BackupPolicy>) -> Result<()> {
        let state = PolicyState {
            last_backup_at: policies
                .iter()
                .filter_map(|(id, p)| p.last_backup_at.map(|at| (id.clone(), at)))
                .collect(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PolicyStore for FilePolicyStore {
    fn policies(&self) -> Vec<(String, BackupPolicy)> {
        self.lock()
            .iter()
            .map(|(id, policy)| (id.clone(), policy.clone()))
            .collect()
    }

    fn record_backup(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut policies = self.lock();
        policies.entry(entity_id.to_string()).or_default().last_backup_at = Some(at);
        self.persist(&policies)
    }
}
