//! Batch job state, owned exclusively by the orchestrator that created it.

use sonde_engines::CancellationToken;
use sonde_protocol::{BatchSnapshot, BatchStatus, FileOutcome};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::info;

/// Control signal observed by pool workers between files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchControl {
    Running,
    Paused,
}

pub(crate) struct BatchState {
    pub batch_id: String,
    pub total_files: usize,
    pub cancel: CancellationToken,
    inner: Mutex<BatchInner>,
    control_tx: watch::Sender<BatchControl>,
    done_tx: watch::Sender<bool>,
}

struct BatchInner {
    completed: usize,
    failed: usize,
    skipped: usize,
    status: BatchStatus,
    results: Vec<FileOutcome>,
}

impl BatchState {
    pub fn new(batch_id: String, total_files: usize) -> Arc<Self> {
        let (control_tx, _) = watch::channel(BatchControl::Running);
        let (done_tx, _) = watch::channel(false);
        let state = Arc::new(Self {
            batch_id,
            total_files,
            cancel: CancellationToken::new(),
            inner: Mutex::new(BatchInner {
                completed: 0,
                failed: 0,
                skipped: 0,
                status: BatchStatus::Queued,
                results: Vec::with_capacity(total_files),
            }),
            control_tx,
            done_tx,
        });
        if total_files == 0 {
            state.lock().status = BatchStatus::Complete;
            let _ = state.done_tx.send(true);
        }
        state
    }

    fn lock(&self) -> MutexGuard<'_, BatchInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn control_rx(&self) -> watch::Receiver<BatchControl> {
        self.control_tx.subscribe()
    }

    /// First dequeue moves a queued batch to running. Paused and terminal
    /// states are left alone.
    pub fn mark_running(&self) {
        let mut inner = self.lock();
        if inner.status == BatchStatus::Queued {
            inner.status = BatchStatus::Running;
        }
    }

    /// Suspend admission of new files. In-flight invocations finish.
    /// No-op on a terminal batch; returns the resulting status either way.
    pub fn pause(&self) -> BatchStatus {
        let mut inner = self.lock();
        if !inner.status.is_terminal() && !self.cancel.is_cancelled() {
            inner.status = BatchStatus::Paused;
            let _ = self.control_tx.send(BatchControl::Paused);
            info!("batch {} paused", self.batch_id);
        }
        inner.status
    }

    /// Resume a paused batch.
    pub fn resume(&self) -> BatchStatus {
        let mut inner = self.lock();
        if inner.status == BatchStatus::Paused {
            inner.status = BatchStatus::Running;
            let _ = self.control_tx.send(BatchControl::Running);
            info!("batch {} resumed", self.batch_id);
        }
        inner.status
    }

    /// Cancel the batch: in-flight invocations are cut through the same
    /// cancellation path as timeouts, queued files drain as skipped.
    pub fn cancel_batch(&self) -> BatchStatus {
        let inner = self.lock();
        if !inner.status.is_terminal() {
            self.cancel.cancel();
            // A paused worker must wake up to drain its queue entries.
            let _ = self.control_tx.send(BatchControl::Running);
            info!("batch {} cancelled", self.batch_id);
        }
        inner.status
    }

    /// Record one per-file outcome. Counters only ever increase; the batch
    /// turns complete exactly when every file is accounted for.
    pub fn record_outcome(&self, outcome: FileOutcome) {
        let mut inner = self.lock();
        match &outcome {
            FileOutcome::Scanned(_) => inner.completed += 1,
            FileOutcome::Failed(_) => inner.failed += 1,
            FileOutcome::Skipped { .. } => inner.skipped += 1,
        }
        inner.results.push(outcome);

        let accounted = inner.completed + inner.failed + inner.skipped;
        if accounted == self.total_files && inner.status != BatchStatus::Failed {
            inner.status = BatchStatus::Complete;
            let _ = self.done_tx.send(true);
            info!(
                "batch {} complete: {} ok, {} failed, {} skipped",
                self.batch_id, inner.completed, inner.failed, inner.skipped
            );
        }
    }

    /// Orchestration-level abort (storage failure). Terminal; per-file
    /// engine errors never land here.
    pub fn mark_failed(&self) {
        let mut inner = self.lock();
        if !inner.status.is_terminal() {
            inner.status = BatchStatus::Failed;
            self.cancel.cancel();
            let _ = self.done_tx.send(true);
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let inner = self.lock();
        BatchSnapshot {
            batch_id: self.batch_id.clone(),
            total_files: self.total_files,
            completed: inner.completed,
            failed: inner.failed,
            skipped: inner.skipped,
            status: inner.status,
            results: inner.results.clone(),
        }
    }

    /// Wait until the batch reaches a terminal state.
    pub async fn wait_terminal(&self) {
        let mut rx = self.done_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sonde_protocol::FailureRecord;

    fn failed_outcome(name: &str) -> FileOutcome {
        FileOutcome::Failed(FailureRecord {
            id: format!("scan_{}", name),
            filename: name.to_string(),
            error_kind: "engine_failure".into(),
            message: "boom".into(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_empty_batch_is_complete_immediately() {
        let batch = BatchState::new("batch_0".into(), 0);
        assert_eq!(batch.status(), BatchStatus::Complete);
        batch.wait_terminal().await;
    }

    #[tokio::test]
    async fn test_counts_drive_completion() {
        let batch = BatchState::new("batch_1".into(), 2);
        batch.mark_running();
        assert_eq!(batch.status(), BatchStatus::Running);

        batch.record_outcome(failed_outcome("a"));
        assert_eq!(batch.status(), BatchStatus::Running);

        batch.record_outcome(FileOutcome::Skipped {
            filename: "b".into(),
            reason: "cancelled".into(),
        });
        let snap = batch.snapshot();
        assert_eq!(snap.status, BatchStatus::Complete);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.completed, 0);
    }

    #[tokio::test]
    async fn test_pause_resume_cycle() {
        let batch = BatchState::new("batch_2".into(), 1);
        batch.mark_running();
        assert_eq!(batch.pause(), BatchStatus::Paused);
        assert_eq!(*batch.control_rx().borrow(), BatchControl::Paused);
        assert_eq!(batch.resume(), BatchStatus::Running);
        assert_eq!(*batch.control_rx().borrow(), BatchControl::Running);
    }

    #[tokio::test]
    async fn test_pause_after_terminal_is_noop() {
        let batch = BatchState::new("batch_3".into(), 0);
        assert_eq!(batch.pause(), BatchStatus::Complete);
        assert_eq!(batch.status(), BatchStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_workers() {
        let batch = BatchState::new("batch_4".into(), 1);
        batch.pause();
        batch.cancel_batch();
        assert!(batch.cancel.is_cancelled());
        assert_eq!(*batch.control_rx().borrow(), BatchControl::Running);
    }

    #[tokio::test]
    async fn test_mark_failed_is_terminal_and_sticky() {
        let batch = BatchState::new("batch_5".into(), 2);
        batch.mark_running();
        batch.mark_failed();
        assert_eq!(batch.status(), BatchStatus::Failed);

        // Late outcomes no longer flip the status.
        batch.record_outcome(failed_outcome("a"));
        batch.record_outcome(failed_outcome("b"));
        assert_eq!(batch.status(), BatchStatus::Failed);
    }
}
