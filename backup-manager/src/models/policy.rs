use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Auto-backup policy attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,

    /// Set only after an automatic job reaches `Complete`.
    #[serde(default)]
    pub last_backup_at: Option<DateTime<Utc>>,
}

fn default_interval_hours() -> u32 {
    24
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            last_backup_at: None,
        }
    }
}

impl BackupPolicy {
    /// Whether an automatic backup is due at `now`.
    ///
    /// A policy that never ran is always due. An interval of zero is treated
    /// as one hour.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_backup_at {
            None => true,
            Some(last) => now - last > Duration::hours(i64::from(self.interval_hours.max(1))),
        }
    }
}
