//! Live orchestrator counters.
//!
//! Plain data, lock-free atomics, single writer per event. Instance-based
//! rather than a process-wide static: every orchestrator is constructed
//! with its own counters so independent instances (and tests) never share
//! state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters mutated by the orchestrator while jobs run.
#[derive(Debug, Default)]
pub struct LiveMetrics {
    pub scans_started: AtomicU64,
    pub scans_completed: AtomicU64,
    pub scans_failed: AtomicU64,
    pub files_skipped: AtomicU64,
    pub engine_invocations: AtomicU64,
    pub duplicates_reused: AtomicU64,
    active_workers: AtomicUsize,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_scans_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_scans_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_scans_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_engine_invocations(&self) {
        self.engine_invocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_duplicates_reused(&self) {
        self.duplicates_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Track one worker entering a file-scan. Returns a guard that
    /// decrements on drop, so a panicking scan cannot leak the gauge.
    pub fn worker_guard(&self) -> WorkerGuard<'_> {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        WorkerGuard { metrics: self }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            engine_invocations: self.engine_invocations.load(Ordering::Relaxed),
            duplicates_reused: self.duplicates_reused.load(Ordering::Relaxed),
            active_workers: self.active_workers(),
        }
    }
}

/// RAII guard for the active-worker gauge.
pub struct WorkerGuard<'a> {
    metrics: &'a LiveMetrics,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Immutable snapshot of the live counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub scans_started: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub files_skipped: u64,
    pub engine_invocations: u64,
    pub duplicates_reused: u64,
    pub active_workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = LiveMetrics::new();
        metrics.inc_scans_started();
        metrics.inc_scans_started();
        metrics.inc_scans_completed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scans_started, 2);
        assert_eq!(snapshot.scans_completed, 1);
        assert_eq!(snapshot.scans_failed, 0);
    }

    #[test]
    fn test_worker_guard_restores_gauge() {
        let metrics = LiveMetrics::new();
        {
            let _a = metrics.worker_guard();
            let _b = metrics.worker_guard();
            assert_eq!(metrics.active_workers(), 2);
        }
        assert_eq!(metrics.active_workers(), 0);
    }
}
