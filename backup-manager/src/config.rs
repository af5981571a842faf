//! Configuration management for the backup manager.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::executor::runner::ExecutionStrategy;
use crate::fs::naming::is_store_name;
use crate::models::BackupPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Working directory for state files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// HTTP/WebSocket server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Cron expression (with seconds) for the auto-backup sweep
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,

    /// Upper bound for delete and stat operations
    #[serde(default = "default_file_op_timeout_secs")]
    pub file_op_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive store directory name, created directly under each entity root
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Files handled between progress checks
    #[serde(default = "default_batch_files")]
    pub batch_files: usize,

    /// Source bytes handled between progress checks
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: u64,

    /// Deflate level (0 stores without compression, 1-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Where archival workers run (thread, cooperative)
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub id: String,

    /// Working directory of the entity
    pub root: PathBuf,

    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
}

// Default values
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/backup-manager")
}

fn default_port() -> u16 {
    9990
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sweep_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_file_op_timeout_secs() -> u64 {
    30
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_batch_files() -> usize {
    64
}

fn default_batch_bytes() -> u64 {
    8 * 1024 * 1024 // 8MB
}

fn default_compression_level() -> u32 {
    6
}

fn default_interval_hours() -> u32 {
    24
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            port: default_port(),
            log_level: default_log_level(),
            sweep_cron: default_sweep_cron(),
            file_op_timeout_secs: default_file_op_timeout_secs(),
        }
    }
}

impl ManagerConfig {
    pub fn file_op_timeout(&self) -> Duration {
        Duration::from_secs(self.file_op_timeout_secs.max(1))
    }

    /// Location of the persisted policy state.
    pub fn policy_state_path(&self) -> PathBuf {
        self.data_dir.join("policy-state.json")
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            batch_files: default_batch_files(),
            batch_bytes: default_batch_bytes(),
            compression_level: default_compression_level(),
            strategy: ExecutionStrategy::default(),
        }
    }
}

impl EntityConfig {
    pub fn backup_policy(&self) -> BackupPolicy {
        match &self.policy {
            Some(policy) => BackupPolicy {
                enabled: policy.enabled,
                interval_hours: policy.interval_hours,
                last_backup_at: None,
            },
            None => BackupPolicy::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            manager: ManagerConfig::default(),
            archive: ArchiveConfig::default(),
            entities: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_store_name(&self.archive.store_dir) {
            anyhow::bail!(
                "archive.store_dir must be a single directory name under the entity root, got {}",
                self.archive.store_dir.display()
            );
        }
        Ok(())
    }

    /// Apply `BACKUP_MANAGER_*` variables, reading `.env` first if present.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        dotenvy::dotenv().ok();

        if let Ok(port) = std::env::var("BACKUP_MANAGER_PORT") {
            self.manager.port = port.parse()?;
        }
        if let Ok(dir) = std::env::var("BACKUP_MANAGER_DATA_DIR") {
            self.manager.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("BACKUP_MANAGER_LOG_LEVEL") {
            self.manager.log_level = level;
        }
        Ok(())
    }

    /// Configured policies keyed by entity id.
    pub fn policies(&self) -> Vec<(String, BackupPolicy)> {
        self.entities
            .iter()
            .map(|entity| (entity.id.clone(), entity.backup_policy()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[entities]]
            id = "lobby"
            root = "/srv/lobby"
            "#,
        )
        .unwrap();

        assert_eq!(config.manager.port, 9990);
        assert_eq!(config.archive.batch_files, 64);
        assert_eq!(config.archive.strategy, ExecutionStrategy::Thread);
        assert_eq!(config.entities.len(), 1);
        assert!(!config.entities[0].backup_policy().enabled);
    }

    #[test]
    fn test_full_file() {
        let config: Config = toml::from_str(
            r#"
            [manager]
            data_dir = "/tmp/bm"
            port = 8080
            sweep_cron = "0 * * * * *"

            [archive]
            store_dir = ".archives"
            compression_level = 0
            strategy = "cooperative"

            [[entities]]
            id = "survival"
            root = "/srv/survival"
            policy = { enabled = true, interval_hours = 6 }
            "#,
        )
        .unwrap();

        assert_eq!(config.manager.policy_state_path(), PathBuf::from("/tmp/bm/policy-state.json"));
        assert_eq!(config.archive.strategy, ExecutionStrategy::Cooperative);
        assert_eq!(config.archive.store_dir, PathBuf::from(".archives"));
        assert!(config.validate().is_ok());

        let policies = config.policies();
        assert_eq!(policies[0].0, "survival");
        assert!(policies[0].1.enabled);
        assert_eq!(policies[0].1.interval_hours, 6);
    }

    #[test]
    fn test_store_dir_outside_entity_root_is_rejected() {
        for store_dir in ["/var/backups", "data/backups", "../shared"] {
            let mut config = Config::default();
            config.archive.store_dir = PathBuf::from(store_dir);
            assert!(config.validate().is_err(), "{store_dir}");
        }
    }

    #[test]
    fn test_from_file_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manager.toml");
        std::fs::write(&path, "[archive]\nstore_dir = \"/var/backups\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
