//! Canonical types shared across the sonde crates.
//!
//! Everything that crosses a crate boundary lives here: the scan entities,
//! the engine wire report, batch bookkeeping, and the error taxonomy.

pub mod error;
pub mod types;

pub use error::ScanError;
pub use types::{
    BatchSnapshot, BatchStatus, ConfidenceBucket, EmbeddedCounts, Engine, EngineReport,
    EngineStats, EngineStatus, EngineVerdict, FailureRecord, FileHashes, FileOutcome,
    HistoryRecord, ScanOptions, ScanResult, SecurityReport, SystemMetrics, ThreatLevel,
};

/// Generate a new scan/batch identifier.
///
/// UUIDv4 rather than the original's millisecond-timestamp ids: concurrent
/// submissions within the same millisecond must not collide.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
