//! Archive file naming.
//!
//! Archives are named `backup-<timestamp>-<label>.zip` where `<timestamp>` is
//! an RFC 3339 instant with `:` and `.` replaced by `-`, and `<label>` is the
//! sanitized display name or `auto`.

use crate::models::BackupType;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::path::{Component, Path};

pub const ARCHIVE_PREFIX: &str = "backup-";
pub const ARCHIVE_EXTENSION: &str = "zip";
pub const AUTO_LABEL: &str = "auto";

/// Width of `2026-10-19T08-30-00-123Z`.
const TIMESTAMP_WIDTH: usize = 24;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Filesystem-safe rendering of an instant.
pub fn timestamp_token(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// A name that would collide with the auto marker gets a suffix so the type
/// recovered from the filename stays `manual`.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if sanitized == AUTO_LABEL || sanitized.ends_with("-auto") {
        format!("{sanitized}_manual")
    } else {
        sanitized
    }
}

/// Build the on-disk filename for a new archive.
pub fn archive_filename(at: DateTime<Utc>, label: Option<&str>) -> String {
    let label = match label {
        Some(name) => sanitize_name(name),
        None => AUTO_LABEL.to_string(),
    };
    format!("{ARCHIVE_PREFIX}{}-{label}.{ARCHIVE_EXTENSION}", timestamp_token(at))
}

/// Sidecar metadata file for an archive.
pub fn sidecar_filename(archive_filename: &str) -> String {
    format!("{archive_filename}.json")
}

/// Whether `filename` looks like an archive this crate produced.
pub fn is_archive_filename(filename: &str) -> bool {
    filename.starts_with(ARCHIVE_PREFIX) && filename.ends_with(&format!(".{ARCHIVE_EXTENSION}"))
}

/// A filename is acceptable for delete/restore if it is one path component
/// naming an archive.
pub fn is_safe_archive_filename(filename: &str) -> bool {
    is_archive_filename(filename)
        && !filename.contains(['/', '\\'])
        && !filename.contains("..")
        && !filename.contains('\0')
}

/// The archive store must be a single directory directly under the entity
/// root, so every entity keeps its own archives.
pub fn is_store_name(store_dir: &Path) -> bool {
    let mut components = store_dir.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Metadata recovered from an archive filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub timestamp: Option<DateTime<Utc>>,
    pub label: String,
    pub backup_type: BackupType,
}

impl ParsedFilename {
    /// Label shown to users when no sidecar is available.
    pub fn display_name(&self) -> String {
        match self.backup_type {
            BackupType::Auto => match self.timestamp {
                Some(ts) => format!("Auto backup {}", ts.format("%Y-%m-%d %H:%M")),
                None => "Auto backup".to_string(),
            },
            BackupType::Manual => self.label.clone(),
        }
    }
}

/// Best-effort parse of `backup-<timestamp>-<label>.zip`.
///
/// The type is decided by the `-auto` suffix alone. The timestamp is only
/// recognised when it has the exact width this module writes; otherwise the
/// whole stem becomes the label.
pub fn parse_archive_filename(filename: &str) -> Option<ParsedFilename> {
    if !is_archive_filename(filename) {
        return None;
    }

    let stem = &filename[ARCHIVE_PREFIX.len()..filename.len() - ARCHIVE_EXTENSION.len() - 1];
    let backup_type = if stem == AUTO_LABEL || stem.ends_with("-auto") {
        BackupType::Auto
    } else {
        BackupType::Manual
    };

    let parsed_ts = stem
        .get(..TIMESTAMP_WIDTH)
        .and_then(|token| NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok())
        .map(|naive| naive.and_utc());

    let label = match parsed_ts {
        Some(_) => stem[TIMESTAMP_WIDTH..].trim_start_matches('-').to_string(),
        None => stem.to_string(),
    };

    Some(ParsedFilename {
        timestamp: parsed_ts,
        label,
        backup_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 5).unwrap() + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_timestamp_token() {
        assert_eq!(timestamp_token(fixed_instant()), "2026-10-19T08-30-05-123Z");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Before Update"), "Before_Update");
        assert_eq!(sanitize_name("v1.2/final!"), "v1_2_final_");
        assert_eq!(sanitize_name("ok-name_1"), "ok-name_1");
        assert_eq!(sanitize_name("auto"), "auto_manual");
        assert_eq!(sanitize_name("nightly-auto"), "nightly-auto_manual");
    }

    #[test]
    fn test_archive_filename() {
        assert_eq!(
            archive_filename(fixed_instant(), Some("Before Update")),
            "backup-2026-10-19T08-30-05-123Z-Before_Update.zip"
        );
        assert_eq!(
            archive_filename(fixed_instant(), None),
            "backup-2026-10-19T08-30-05-123Z-auto.zip"
        );
    }

    #[test]
    fn test_parse_manual_with_dashes() {
        let parsed = parse_archive_filename("backup-2026-10-19T08-30-05-123Z-pre-update-v2.zip").unwrap();
        assert_eq!(parsed.backup_type, BackupType::Manual);
        assert_eq!(parsed.label, "pre-update-v2");
        assert_eq!(parsed.timestamp, Some(fixed_instant()));
    }

    #[test]
    fn test_parse_auto() {
        let parsed = parse_archive_filename("backup-2026-10-19T08-30-05-123Z-auto.zip").unwrap();
        assert_eq!(parsed.backup_type, BackupType::Auto);
        assert!(parsed.display_name().starts_with("Auto backup 2026-10-19"));
    }

    #[test]
    fn test_parse_legacy_layout_falls_back_to_stem() {
        let parsed = parse_archive_filename("backup-20240101-nightly-auto.zip").unwrap();
        assert_eq!(parsed.backup_type, BackupType::Auto);
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.label, "20240101-nightly-auto");
    }

    #[test]
    fn test_rejects_foreign_files() {
        assert!(parse_archive_filename("notes.txt").is_none());
        assert!(parse_archive_filename("backup-x.tar.gz").is_none());
    }

    #[test]
    fn test_safe_filename() {
        assert!(is_safe_archive_filename("backup-2026-auto.zip"));
        assert!(!is_safe_archive_filename("../backup-2026-auto.zip"));
        assert!(!is_safe_archive_filename("backup-a/../../etc.zip"));
        assert!(!is_safe_archive_filename("world.zip"));
    }

    #[test]
    fn test_store_name_is_one_component() {
        assert!(is_store_name(Path::new("backups")));
        assert!(!is_store_name(Path::new("/var/backups")));
        assert!(!is_store_name(Path::new("data/backups")));
        assert!(!is_store_name(Path::new("..")));
        assert!(!is_store_name(Path::new("")));
    }

    #[test]
    fn test_round_trip_type_for_every_generated_name() {
        for label in [None, Some("auto"), Some("x-auto"), Some("Weekly")] {
            let name = archive_filename(fixed_instant(), label);
            let parsed = parse_archive_filename(&name).unwrap();
            let expected = if label.is_none() { BackupType::Auto } else { BackupType::Manual };
            assert_eq!(parsed.backup_type, expected, "{name}");
        }
    }
}
