// ═══════════════════════════════════════════════════════════════
// METRICS - Counting inserts, skips and scans, without a single lock
// ═══════════════════════════════════════════════════════════════
//
// Every counter is an atomic bumped with Relaxed ordering. They are
// advisory numbers for logs and health output, not something any
// correctness decision reads back.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Instant;

/// Serializable point-in-time view of the counters.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub entries_inserted: u64,
    pub duplicates_skipped: u64,
    /// Skips caught by the re-check inside the write transaction, i.e.
    /// races the read-only probe could not see
    pub races_caught: u64,
    pub validation_rejections: u64,
    pub entries_deleted: u64,
    pub scans_completed: u64,
    pub scans_cancelled: u64,
    pub uptime_seconds: u64,
}

/// Lock-free counters owned by a controller.
pub struct FingerprintStats {
    inserted: AtomicU64,
    skipped: AtomicU64,
    races_caught: AtomicU64,
    rejected: AtomicU64,
    deleted: AtomicU64,
    scans_completed: AtomicU64,
    scans_cancelled: AtomicU64,
    start_time: Instant,
}

impl Default for FingerprintStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintStats {
    pub fn new() -> Self {
        Self {
            inserted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            races_caught: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            scans_completed: AtomicU64::new(0),
            scans_cancelled: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// A skipped insert. `raced` is true when only the write-side re-check
    /// saw the existing entry.
    pub fn increment_skipped(&self, raced: bool) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        if raced {
            self.races_caught.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scans(&self, cancelled: bool) {
        if cancelled {
            self.scans_cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entries_inserted: self.inserted.load(Ordering::Relaxed),
            duplicates_skipped: self.skipped.load(Ordering::Relaxed),
            races_caught: self.races_caught.load(Ordering::Relaxed),
            validation_rejections: self.rejected.load(Ordering::Relaxed),
            entries_deleted: self.deleted.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_cancelled: self.scans_cancelled.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let s = FingerprintStats::new().snapshot();
        assert_eq!(s.entries_inserted, 0);
        assert_eq!(s.duplicates_skipped, 0);
        assert_eq!(s.scans_completed, 0);
    }

    #[test]
    fn test_raced_skip_counts_twice() {
        let stats = FingerprintStats::new();
        stats.increment_skipped(false);
        stats.increment_skipped(true);
        let s = stats.snapshot();
        assert_eq!(s.duplicates_skipped, 2);
        assert_eq!(s.races_caught, 1);
    }

    #[test]
    fn test_cancelled_scans_are_separate() {
        let stats = FingerprintStats::new();
        stats.increment_scans(false);
        stats.increment_scans(true);
        stats.increment_scans(true);
        let s = stats.snapshot();
        assert_eq!(s.scans_completed, 1);
        assert_eq!(s.scans_cancelled, 2);
    }
}
