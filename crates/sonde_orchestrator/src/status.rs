//! Read-only status and metrics lookups.
//!
//! The service never mutates orchestrator or store state; every answer is
//! computed fresh from the live counters, the registry, and the history
//! store - nothing is cached beyond the single request.

use chrono::Utc;
use serde::Serialize;
use sonde_protocol::{
    BatchSnapshot, EngineStats, EngineStatus, HistoryRecord, ScanError, SystemMetrics,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

use crate::orchestrator::Orchestrator;

/// Interval between the two CPU refreshes a usage sample needs.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Answer to "what is the status of job X": a live batch or a persisted
/// record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStatus {
    Batch(BatchSnapshot),
    Record(HistoryRecord),
}

/// Per-engine live status joined with usage aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatusEntry {
    pub status: EngineStatus,
    pub version: String,
    pub cost: f32,
    #[serde(flatten)]
    pub stats: EngineStats,
}

pub struct StatusService {
    orchestrator: Arc<Orchestrator>,
}

impl StatusService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Status of a batch or single scan by id. Live batches win over
    /// history; unknown ids are `NotFound`.
    pub async fn job_status(&self, id: &str) -> Result<JobStatus, ScanError> {
        if let Some(snapshot) = self.orchestrator.batch_snapshot(id) {
            return Ok(JobStatus::Batch(snapshot));
        }
        let record = self
            .orchestrator
            .store()
            .get(id)
            .await
            .map_err(ScanError::from)?;
        Ok(JobStatus::Record(record))
    }

    /// Point-in-time host and scan statistics.
    pub async fn system_metrics(&self) -> Result<SystemMetrics, ScanError> {
        let engine_stats = self
            .orchestrator
            .store()
            .engine_stats()
            .await
            .map_err(ScanError::from)?;
        let total_scans = self
            .orchestrator
            .store()
            .count()
            .await
            .map_err(ScanError::from)?;

        let mut sys = System::new();
        sys.refresh_cpu();
        // CPU usage is a delta between two samples.
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        sys.refresh_cpu();
        sys.refresh_memory();
        sys.refresh_disks_list();
        sys.refresh_disks();

        let cpu_usage = sys.global_cpu_info().cpu_usage();
        let memory_total = sys.total_memory();
        let memory_used = sys.used_memory();
        let memory_usage = percentage(memory_used, memory_total);

        let mut disk_total = 0u64;
        let mut disk_available = 0u64;
        for disk in sys.disks() {
            disk_total += disk.total_space();
            disk_available += disk.available_space();
        }
        let disk_used = disk_total.saturating_sub(disk_available);

        Ok(SystemMetrics {
            cpu_usage,
            memory_usage,
            memory_total,
            memory_used,
            disk_usage: percentage(disk_used, disk_total),
            disk_total,
            disk_used,
            active_workers: self.orchestrator.metrics().active_workers(),
            total_scans,
            engine_stats,
            timestamp: Utc::now(),
        })
    }

    /// Live status plus usage aggregates for every registered engine.
    pub async fn engine_status(
        &self,
    ) -> Result<BTreeMap<String, EngineStatusEntry>, ScanError> {
        let stats = self
            .orchestrator
            .store()
            .engine_stats()
            .await
            .map_err(ScanError::from)?;

        let mut entries = BTreeMap::new();
        for engine in self.orchestrator.registry().list() {
            let engine_stats = stats.get(&engine.name).cloned().unwrap_or_default();
            entries.insert(
                engine.name.clone(),
                EngineStatusEntry {
                    status: engine.status,
                    version: engine.version,
                    cost: engine.cost,
                    stats: engine_stats,
                },
            );
        }
        Ok(entries)
    }
}

fn percentage(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(50, 100), 50.0);
        assert_eq!(percentage(1, 3), (1.0f64 / 3.0 * 100.0) as f32);
    }
}
