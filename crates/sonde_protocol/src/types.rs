//! Scan entities, options, and the engine wire report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ScanError;

// ============================================================================
// Canonical Enums
// ============================================================================

/// Live availability of a detection engine.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    #[default]
    Available,
    Unavailable,
    /// Engine responds but its last probe reported a problem (e.g. the
    /// backing binary is an unexpected version).
    Degraded,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Available => "available",
            EngineStatus::Unavailable => "unavailable",
            EngineStatus::Degraded => "degraded",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(EngineStatus::Available),
            "unavailable" => Ok(EngineStatus::Unavailable),
            "degraded" => Ok(EngineStatus::Degraded),
            _ => Err(format!(
                "Invalid engine status: '{}'. Expected: available, unavailable, or degraded",
                s
            )),
        }
    }
}

/// Coarse risk bucket derived deterministically from a malware score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    /// Fixed bucketing contract: score < 0.3 is low, 0.3 <= score < 0.7 is
    /// medium, score >= 0.7 is high.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.7 {
            ThreatLevel::High
        } else if score >= 0.3 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence bucketing used by downstream consumers. Not stored on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBucket {
    Low,
    Medium,
    High,
}

impl ConfidenceBucket {
    /// confidence >= 0.9 is high, 0.7 <= c < 0.9 is medium, < 0.7 is low.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            ConfidenceBucket::High
        } else if confidence >= 0.7 {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }
}

/// Batch lifecycle. Counters on the owning job increase monotonically until
/// a terminal state is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Queued,
    Running,
    /// Operator-requested suspension: in-flight invocations finish, no new
    /// ones start. Resumes to Running.
    Paused,
    Complete,
    /// Orchestration-level abort (e.g. storage failure). Per-file engine
    /// errors never put a batch here.
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Complete => "complete",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Complete | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Engines
// ============================================================================

/// A registered detection engine. Immutable once registered; only the
/// registry refreshes `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub name: String,
    pub version: String,
    pub status: EngineStatus,
    /// Relative invocation cost advertised by the engine (cheap signature
    /// probes ~0.1, spawned tools ~1.0).
    pub cost: f32,
}

/// Raw wire output of one engine invocation, before normalization.
///
/// Engines are loosely typed: known fields are parsed here, anything else
/// lands in `extra` and is only interpreted at the normalizer boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    pub media_type: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default)]
    pub elapsed_ms: f64,
    /// Some engines assess risk themselves; most only classify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malware_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<FileHashes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Open extension mapping for engine-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-engine candidate summary recorded on the normalized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineVerdict {
    pub media_type: String,
    pub confidence: f32,
    pub elapsed_ms: f64,
}

/// Aggregate usage statistics for one engine, derived from history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub scans_completed: u64,
    pub avg_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

// ============================================================================
// Scan Options
// ============================================================================

/// Per-job configuration, immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Engine names to restrict to. Empty means all available engines.
    pub engines: Vec<String>,
    pub deep_analysis: bool,
    pub generate_hashes: bool,
    pub extract_metadata: bool,
    pub validate_signatures: bool,
    /// Reuse results for byte-identical files within a batch. Forces the
    /// content hash to be computed before any engine runs.
    pub skip_duplicates: bool,
    pub timeout_ms: u64,
    pub max_file_size_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            deep_analysis: true,
            generate_hashes: true,
            extract_metadata: true,
            validate_signatures: true,
            skip_duplicates: false,
            timeout_ms: 30_000,
            max_file_size_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ScanOptions {
    /// Reject malformed options before any work is admitted.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.timeout_ms == 0 {
            return Err(ScanError::InvalidOptions(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(ScanError::InvalidOptions(
                "max_file_size_bytes must be greater than zero".to_string(),
            ));
        }
        for name in &self.engines {
            if name.trim().is_empty() {
                return Err(ScanError::InvalidOptions(
                    "engine restriction contains an empty name".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scan Results
// ============================================================================

/// Content hashes computed over the full payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// Lowercase hex, zero-padded to 8 digits.
    pub crc32: String,
}

/// Counts of embedded content discovered during deep analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedCounts {
    pub files: u32,
    pub scripts: u32,
    pub forms: u32,
}

/// Downstream security assessment. Absent entirely when not computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub malware_score: f32,
    pub threat_level: ThreatLevel,
    pub signatures: Vec<String>,
    pub anomalies: Vec<String>,
    pub embedded: EmbeddedCounts,
}

/// Canonical output entity for one scanned file.
///
/// Created once engine invocations complete, immutable afterwards, and
/// appended to the history store exactly once. Corrections require a new
/// record, never an in-place edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub detected_type: String,
    pub mime_type: String,
    /// Confidence of the winning candidate, always within [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Every engine consulted for this file, in deterministic (lexicographic)
    /// order. Never empty for a completed result.
    pub engines_used: Vec<String>,
    pub scan_duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<FileHashes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityReport>,
    /// Per-engine verdicts for every consulted engine, keyed by engine name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, EngineVerdict>>,
}

/// Persisted failure marker: a file whose scan failed still leaves exactly
/// one durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub filename: String,
    pub error_kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One durable history entry: either a completed result or a failure marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    Scan(ScanResult),
    Failure(FailureRecord),
}

impl HistoryRecord {
    pub fn id(&self) -> &str {
        match self {
            HistoryRecord::Scan(r) => &r.id,
            HistoryRecord::Failure(f) => &f.id,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            HistoryRecord::Scan(r) => &r.filename,
            HistoryRecord::Failure(f) => &f.filename,
        }
    }

    pub fn as_scan(&self) -> Option<&ScanResult> {
        match self {
            HistoryRecord::Scan(r) => Some(r),
            HistoryRecord::Failure(_) => None,
        }
    }
}

// ============================================================================
// Batch Jobs
// ============================================================================

/// Per-file entry in a batch's results sequence, in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Scanned(ScanResult),
    Failed(FailureRecord),
    /// Queued file that never started (batch cancelled). Distinct from
    /// failed.
    Skipped { filename: String, reason: String },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Scanned(r) => &r.filename,
            FileOutcome::Failed(f) => &f.filename,
            FileOutcome::Skipped { filename, .. } => filename,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failed(_))
    }
}

/// Read-only snapshot of a batch job, handed out by the status service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub total_files: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub status: BatchStatus,
    /// Outcomes in completion order, which need not match submission order.
    pub results: Vec<FileOutcome>,
}

// ============================================================================
// System Metrics
// ============================================================================

/// Point-in-time host and scan statistics. Recomputed on every request,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub memory_total: u64,
    pub memory_used: u64,
    pub disk_usage: f32,
    pub disk_total: u64,
    pub disk_used: u64,
    pub active_workers: usize,
    pub total_scans: u64,
    pub engine_stats: BTreeMap<String, EngineStats>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_level_thresholds() {
        assert_eq!(ThreatLevel::from_score(0.0), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.29), ThreatLevel::Low);
        // Boundary: 0.3 is medium (inclusive)
        assert_eq!(ThreatLevel::from_score(0.3), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.69), ThreatLevel::Medium);
        // Boundary: 0.7 is high (inclusive)
        assert_eq!(ThreatLevel::from_score(0.7), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(1.0), ThreatLevel::High);
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(
            ConfidenceBucket::from_confidence(0.95),
            ConfidenceBucket::High
        );
        assert_eq!(
            ConfidenceBucket::from_confidence(0.9),
            ConfidenceBucket::High
        );
        // 0.9 exclusive upper bound for medium
        assert_eq!(
            ConfidenceBucket::from_confidence(0.89),
            ConfidenceBucket::Medium
        );
        assert_eq!(
            ConfidenceBucket::from_confidence(0.7),
            ConfidenceBucket::Medium
        );
        assert_eq!(
            ConfidenceBucket::from_confidence(0.69),
            ConfidenceBucket::Low
        );
    }

    #[test]
    fn test_options_validation() {
        assert!(ScanOptions::default().validate().is_ok());

        let bad_timeout = ScanOptions {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad_timeout.validate(),
            Err(ScanError::InvalidOptions(_))
        ));

        let bad_size = ScanOptions {
            max_file_size_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad_size.validate(),
            Err(ScanError::InvalidOptions(_))
        ));

        let empty_engine = ScanOptions {
            engines: vec!["signature".to_string(), "  ".to_string()],
            ..Default::default()
        };
        assert!(empty_engine.validate().is_err());
    }

    #[test]
    fn test_batch_status_terminal() {
        assert!(!BatchStatus::Queued.is_terminal());
        assert!(!BatchStatus::Running.is_terminal());
        assert!(!BatchStatus::Paused.is_terminal());
        assert!(BatchStatus::Complete.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
    }

    #[test]
    fn test_engine_status_roundtrip() {
        for status in [
            EngineStatus::Available,
            EngineStatus::Unavailable,
            EngineStatus::Degraded,
        ] {
            let parsed: EngineStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<EngineStatus>().is_err());
    }

    #[test]
    fn test_engine_report_open_extension_mapping() {
        let raw = serde_json::json!({
            "engine": "magic",
            "media_type": "application/pdf",
            "confidence": 0.98,
            "elapsed_ms": 1.5,
            "pdf_version": "1.7",
            "linearized": false
        });
        let report: EngineReport = serde_json::from_value(raw).unwrap();
        assert_eq!(report.engine, "magic");
        assert_eq!(report.extension, None);
        assert_eq!(report.extra.get("pdf_version").unwrap(), "1.7");
        assert_eq!(report.extra.get("linearized").unwrap(), false);
    }

    #[test]
    fn test_scan_result_omits_absent_subrecords() {
        let result = ScanResult {
            id: "scan_1".into(),
            filename: "a.pdf".into(),
            size_bytes: 4,
            detected_type: "application/pdf".into(),
            mime_type: "application/pdf".into(),
            confidence: 0.9,
            extension: Some("pdf".into()),
            engines_used: vec!["signature".into()],
            scan_duration_ms: 3,
            timestamp: Utc::now(),
            hashes: None,
            metadata: None,
            structure: None,
            security: None,
            breakdown: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        let obj = json.as_object().unwrap();
        // "field not computed" must be distinguishable from "computed empty"
        assert!(!obj.contains_key("hashes"));
        assert!(!obj.contains_key("security"));
        assert!(!obj.contains_key("metadata"));
    }

    #[test]
    fn test_history_record_tagging() {
        let marker = HistoryRecord::Failure(FailureRecord {
            id: "scan_9".into(),
            filename: "bad.bin".into(),
            error_kind: "engine_failure".into(),
            message: "exit status 1".into(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["kind"], "failure");
        let back: HistoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), "scan_9");
        assert!(back.as_scan().is_none());
    }
}
