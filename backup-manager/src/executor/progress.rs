//! Percent calculation and event throttling for archival jobs.
//!
//! Scanning reports 0%, archiving spans 5-95% by bytes (or by file count for
//! an all-empty tree), and 95-100% is held back for finalizing so the bar
//! never shows 100% before the archive is on disk.

use std::time::{Duration, Instant};

pub const ARCHIVING_FLOOR: i32 = 5;
pub const ARCHIVING_CEILING: i32 = 95;
pub const COMPLETE_PERCENT: i32 = 100;

/// Minimum percent change between two archiving events.
const MIN_STEP: i32 = 2;

/// Tracks archiving progress and decides when an event is worth sending
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    pub total_files: usize,
    pub total_bytes: u64,
    pub processed_files: usize,
    pub processed_bytes: u64,
    last_emitted: Option<i32>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total_files: usize, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            processed_files: 0,
            processed_bytes: 0,
            last_emitted: None,
            started: Instant::now(),
        }
    }

    /// Account for one handled file.
    pub fn record_file(&mut self, bytes: u64) {
        self.processed_files += 1;
        self.processed_bytes += bytes;
    }

    /// Current archiving percent, clamped to the archiving range.
    pub fn archiving_percent(&self) -> i32 {
        let ratio = if self.total_bytes > 0 {
            self.processed_bytes as f64 / self.total_bytes as f64
        } else if self.total_files > 0 {
            self.processed_files as f64 / self.total_files as f64
        } else {
            0.0
        };
        let span = f64::from(ARCHIVING_CEILING - ARCHIVING_FLOOR);
        let percent = (f64::from(ARCHIVING_FLOOR) + span * ratio).round() as i32;
        percent.clamp(ARCHIVING_FLOOR, ARCHIVING_CEILING)
    }

    /// Returns the percent to report if it moved enough since the last event.
    pub fn next_event(&mut self) -> Option<i32> {
        let percent = self.archiving_percent();
        let emit = match self.last_emitted {
            None => true,
            Some(last) => {
                percent > last && (percent - last >= MIN_STEP || percent == ARCHIVING_CEILING)
            }
        };
        if emit {
            self.last_emitted = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    /// Record a percent reported outside the archiving range (scan, finalize).
    pub fn mark_emitted(&mut self, percent: i32) {
        self.last_emitted = Some(self.last_emitted.map_or(percent, |last| last.max(percent)));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average throughput since the tracker was created.
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.processed_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_by_bytes() {
        let mut tracker = ProgressTracker::new(2, 1000);
        assert_eq!(tracker.archiving_percent(), 5);

        tracker.record_file(500);
        assert_eq!(tracker.archiving_percent(), 50);

        tracker.record_file(500);
        assert_eq!(tracker.archiving_percent(), 95);
    }

    #[test]
    fn test_percent_by_file_count_when_tree_is_empty_files() {
        let mut tracker = ProgressTracker::new(4, 0);
        tracker.record_file(0);
        tracker.record_file(0);
        assert_eq!(tracker.archiving_percent(), 50);
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let mut tracker = ProgressTracker::new(1, 10);
        tracker.record_file(50);
        assert_eq!(tracker.archiving_percent(), 95);
    }

    #[test]
    fn test_throttles_small_steps() {
        let mut tracker = ProgressTracker::new(1000, 1000);
        tracker.mark_emitted(0);

        tracker.record_file(1);
        assert_eq!(tracker.next_event(), Some(5));

        tracker.record_file(1);
        assert_eq!(tracker.next_event(), None);

        tracker.record_file(20);
        assert_eq!(tracker.next_event(), Some(7));
    }

    #[test]
    fn test_ceiling_always_reported() {
        let mut tracker = ProgressTracker::new(100, 1000);
        tracker.record_file(935);
        assert_eq!(tracker.next_event(), Some(89));
        tracker.record_file(55);
        assert_eq!(tracker.next_event(), Some(94));
        // one point above the last event, but it is the ceiling
        tracker.record_file(10);
        assert_eq!(tracker.next_event(), Some(95));
        assert_eq!(tracker.next_event(), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
