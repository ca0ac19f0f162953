//! Result normalization: many raw engine reports, one canonical record.

use sonde_protocol::{
    new_id, EngineReport, EngineVerdict, FileHashes, ScanError, ScanResult, SecurityReport,
};
use std::collections::BTreeMap;

/// Everything the orchestrator gathered for one file before normalization.
/// Sub-records are attached only when actually computed upstream; the
/// normalizer never fabricates them.
pub struct NormalizeInput<'a> {
    pub filename: &'a str,
    pub size_bytes: u64,
    pub reports: &'a [EngineReport],
    pub hashes: Option<FileHashes>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub structure: Option<serde_json::Map<String, serde_json::Value>>,
    pub security: Option<SecurityReport>,
    pub scan_duration_ms: u64,
}

/// Pick the winning candidate among engine reports.
///
/// Highest confidence wins; equal confidence tie-breaks toward the
/// lexicographically smaller engine name so results are reproducible.
pub fn select_primary(reports: &[EngineReport]) -> Option<&EngineReport> {
    let mut sorted: Vec<&EngineReport> = reports.iter().collect();
    sorted.sort_by(|a, b| a.engine.cmp(&b.engine));

    let mut best: Option<&EngineReport> = None;
    for report in sorted {
        match best {
            Some(current) if report.confidence <= current.confidence => {}
            _ => best = Some(report),
        }
    }
    best
}

/// Merge engine-supplied metadata maps in engine-name order; on key
/// collisions the first engine (by name) wins. Returns None when no engine
/// supplied any metadata, keeping "not computed" distinguishable.
pub fn merge_engine_metadata(
    reports: &[EngineReport],
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let mut sorted: Vec<&EngineReport> = reports.iter().collect();
    sorted.sort_by(|a, b| a.engine.cmp(&b.engine));

    let mut merged = serde_json::Map::new();
    for report in sorted {
        if let Some(metadata) = &report.metadata {
            for (key, value) in metadata {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Produce the canonical result for one file.
///
/// Deterministic given the same inputs, except for the generated id and
/// timestamp. All consulted engines are recorded regardless of which one
/// won.
pub fn normalize(input: NormalizeInput<'_>) -> Result<ScanResult, ScanError> {
    let primary = select_primary(input.reports).ok_or_else(|| {
        ScanError::engine_failure("normalizer", "no engine reports to normalize")
    })?;

    let mut engines_used: Vec<String> =
        input.reports.iter().map(|r| r.engine.clone()).collect();
    engines_used.sort();
    engines_used.dedup();

    let breakdown: BTreeMap<String, EngineVerdict> = input
        .reports
        .iter()
        .map(|r| {
            (
                r.engine.clone(),
                EngineVerdict {
                    media_type: r.media_type.clone(),
                    confidence: r.confidence,
                    elapsed_ms: r.elapsed_ms,
                },
            )
        })
        .collect();

    // Orchestrator-computed hashes win; engine-supplied ones fill in only
    // when the orchestrator did not hash (winner first, then name order).
    let hashes = input.hashes.or_else(|| {
        select_primary(input.reports)
            .and_then(|p| p.hashes.clone())
            .or_else(|| {
                let mut sorted: Vec<&EngineReport> = input.reports.iter().collect();
                sorted.sort_by(|a, b| a.engine.cmp(&b.engine));
                sorted.into_iter().find_map(|r| r.hashes.clone())
            })
    });

    Ok(ScanResult {
        id: new_id("scan"),
        filename: input.filename.to_string(),
        size_bytes: input.size_bytes,
        detected_type: primary.media_type.clone(),
        mime_type: primary.media_type.clone(),
        confidence: primary.confidence.clamp(0.0, 1.0),
        extension: primary.extension.clone(),
        engines_used,
        scan_duration_ms: input.scan_duration_ms,
        timestamp: chrono::Utc::now(),
        hashes,
        metadata: input.metadata,
        structure: input.structure,
        security: input.security,
        breakdown: Some(breakdown),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(engine: &str, media_type: &str, confidence: f32) -> EngineReport {
        EngineReport {
            engine: engine.to_string(),
            engine_version: None,
            media_type: media_type.to_string(),
            confidence,
            extension: None,
            elapsed_ms: 2.0,
            malware_score: None,
            hashes: None,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }

    fn input<'a>(reports: &'a [EngineReport]) -> NormalizeInput<'a> {
        NormalizeInput {
            filename: "sample.bin",
            size_bytes: 64,
            reports,
            hashes: None,
            metadata: None,
            structure: None,
            security: None,
            scan_duration_ms: 7,
        }
    }

    #[test]
    fn test_highest_confidence_wins() {
        let reports = vec![
            report("alpha", "text/plain", 0.6),
            report("beta", "application/pdf", 0.95),
        ];
        let result = normalize(input(&reports)).unwrap();
        assert_eq!(result.detected_type, "application/pdf");
        assert_eq!(result.confidence, 0.95);
        // Both consulted engines recorded regardless of winner.
        assert_eq!(result.engines_used, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let reports = vec![
            report("zeta", "application/zip", 0.8),
            report("alpha", "text/csv", 0.8),
        ];
        let result = normalize(input(&reports)).unwrap();
        assert_eq!(result.detected_type, "text/csv");
    }

    #[test]
    fn test_engines_used_is_sorted_and_never_empty() {
        let reports = vec![
            report("zeta", "a/b", 0.1),
            report("alpha", "a/b", 0.2),
            report("mid", "a/b", 0.3),
        ];
        let result = normalize(input(&reports)).unwrap();
        assert_eq!(result.engines_used, vec!["alpha", "mid", "zeta"]);
        assert!(!result.engines_used.is_empty());
    }

    #[test]
    fn test_no_reports_is_an_error() {
        let reports: Vec<EngineReport> = vec![];
        assert!(normalize(input(&reports)).is_err());
    }

    #[test]
    fn test_idempotent_except_id_and_timestamp() {
        let reports = vec![
            report("alpha", "text/plain", 0.6),
            report("beta", "application/pdf", 0.95),
        ];
        let mut first = normalize(input(&reports)).unwrap();
        let mut second = normalize(input(&reports)).unwrap();

        assert_ne!(first.id, second.id);
        first.id = String::new();
        second.id = String::new();
        first.timestamp = second.timestamp;

        let a = serde_json::to_string(&first).unwrap();
        let b = serde_json::to_string(&second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_orchestrator_hashes_win_over_engine_hashes() {
        let mut with_hashes = report("alpha", "text/plain", 0.9);
        with_hashes.hashes = Some(FileHashes {
            md5: "engine".into(),
            sha1: "engine".into(),
            sha256: "engine".into(),
            crc32: "engine".into(),
        });
        let reports = vec![with_hashes];

        let mut inp = input(&reports);
        inp.hashes = Some(FileHashes {
            md5: "local".into(),
            sha1: "local".into(),
            sha256: "local".into(),
            crc32: "local".into(),
        });
        let result = normalize(inp).unwrap();
        assert_eq!(result.hashes.unwrap().md5, "local");

        // Without local hashes the engine-supplied ones survive.
        let result = normalize(input(&reports)).unwrap();
        assert_eq!(result.hashes.unwrap().md5, "engine");
    }

    #[test]
    fn test_absent_subrecords_stay_absent() {
        let reports = vec![report("alpha", "text/plain", 0.5)];
        let result = normalize(input(&reports)).unwrap();
        assert!(result.hashes.is_none());
        assert!(result.metadata.is_none());
        assert!(result.structure.is_none());
        assert!(result.security.is_none());
    }

    #[test]
    fn test_merge_engine_metadata_first_writer_wins() {
        let mut a = report("alpha", "a/b", 0.5);
        let mut z = report("zeta", "a/b", 0.9);
        a.metadata = Some(
            serde_json::json!({"charset": "utf-8"})
                .as_object()
                .unwrap()
                .clone(),
        );
        z.metadata = Some(
            serde_json::json!({"charset": "latin-1", "lines": 10})
                .as_object()
                .unwrap()
                .clone(),
        );
        // zeta wins detection, but alpha sorts first for metadata merging
        let merged = merge_engine_metadata(&[z, a]).unwrap();
        assert_eq!(merged.get("charset").unwrap(), "utf-8");
        assert_eq!(merged.get("lines").unwrap(), 10);
    }

    #[test]
    fn test_merge_engine_metadata_none_when_absent() {
        let reports = vec![report("alpha", "a/b", 0.5)];
        assert!(merge_engine_metadata(&reports).is_none());
    }
}
