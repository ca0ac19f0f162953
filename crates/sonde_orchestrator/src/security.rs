//! Downstream security assessment.
//!
//! Threat analysis is not assumed to be an engine capability: most engines
//! only classify. The assessor starts from an engine-supplied malware score
//! when one exists and layers cheap local heuristics on top. The resulting
//! sub-record is attached only when assessment actually ran.

use sonde_protocol::{EmbeddedCounts, EngineReport, SecurityReport, ThreatLevel};

/// Payloads above this size earn a "large file size" anomaly.
const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Assess one payload given the winning engine report.
pub fn assess(payload_len: u64, filename: &str, primary: &EngineReport) -> SecurityReport {
    let mut score = primary.malware_score.unwrap_or(0.0);
    let mut anomalies = Vec::new();

    if payload_len > LARGE_FILE_BYTES {
        anomalies.push("large file size".to_string());
        score += 0.1;
    }

    // Declared extension disagreeing with the detected type is the classic
    // disguise signal.
    if let (Some(expected), Some(actual)) = (primary.extension.as_deref(), file_extension(filename))
    {
        if !expected.eq_ignore_ascii_case(&actual) {
            anomalies.push("extension mismatch".to_string());
            score += 0.2;
        }
    }

    let score = score.clamp(0.0, 1.0);
    SecurityReport {
        malware_score: score,
        threat_level: ThreatLevel::from_score(score),
        signatures: Vec::new(),
        anomalies,
        embedded: EmbeddedCounts::default(),
    }
}

fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
