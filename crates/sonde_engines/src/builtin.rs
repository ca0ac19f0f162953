//! In-process signature engine.
//!
//! Classifies payloads by magic-byte prefixes plus a couple of cheap text
//! heuristics. This is the default engine: always available, no external
//! dependencies, cost 0.1.

use async_trait::async_trait;
use sonde_protocol::{EngineReport, EngineStatus, ScanError};
use std::time::Instant;

use crate::transport::EngineTransport;

/// Magic signature for one file format.
struct MagicSignature {
    media_type: &'static str,
    extension: &'static str,
    offset: usize,
    bytes: &'static [u8],
    confidence: f32,
}

impl MagicSignature {
    fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.offset + self.bytes.len()
            && &data[self.offset..self.offset + self.bytes.len()] == self.bytes
    }
}

/// Signatures are checked in order; first match wins, so more specific
/// prefixes must precede generic ones (OOXML before plain ZIP).
const SIGNATURES: &[MagicSignature] = &[
    MagicSignature {
        media_type: "application/pdf",
        extension: "pdf",
        offset: 0,
        bytes: b"%PDF-",
        confidence: 0.98,
    },
    MagicSignature {
        media_type: "image/png",
        extension: "png",
        offset: 0,
        bytes: &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        confidence: 0.99,
    },
    MagicSignature {
        media_type: "image/jpeg",
        extension: "jpg",
        offset: 0,
        bytes: &[0xFF, 0xD8, 0xFF],
        confidence: 0.95,
    },
    MagicSignature {
        media_type: "image/gif",
        extension: "gif",
        offset: 0,
        bytes: b"GIF87a",
        confidence: 0.99,
    },
    MagicSignature {
        media_type: "image/gif",
        extension: "gif",
        offset: 0,
        bytes: b"GIF89a",
        confidence: 0.99,
    },
    MagicSignature {
        media_type: "application/zip",
        extension: "zip",
        offset: 0,
        bytes: &[0x50, 0x4B, 0x03, 0x04],
        confidence: 0.90,
    },
    MagicSignature {
        media_type: "application/gzip",
        extension: "gz",
        offset: 0,
        bytes: &[0x1F, 0x8B],
        confidence: 0.95,
    },
    MagicSignature {
        media_type: "application/x-elf",
        extension: "elf",
        offset: 0,
        bytes: &[0x7F, 0x45, 0x4C, 0x46],
        confidence: 0.99,
    },
    MagicSignature {
        media_type: "application/vnd.microsoft.portable-executable",
        extension: "exe",
        offset: 0,
        bytes: &[0x4D, 0x5A],
        confidence: 0.85,
    },
    MagicSignature {
        media_type: "application/x-tar",
        extension: "tar",
        offset: 257,
        bytes: b"ustar",
        confidence: 0.95,
    },
    MagicSignature {
        media_type: "application/x-sqlite3",
        extension: "db",
        offset: 0,
        bytes: b"SQLite format 3\0",
        confidence: 0.99,
    },
];

/// The built-in magic-byte detection engine.
#[derive(Debug, Default)]
pub struct SignatureEngine;

impl SignatureEngine {
    pub const NAME: &'static str = "signature";

    pub fn new() -> Self {
        Self
    }

    fn classify(payload: &[u8]) -> (String, Option<String>, f32) {
        for sig in SIGNATURES {
            if sig.matches(payload) {
                return (
                    sig.media_type.to_string(),
                    Some(sig.extension.to_string()),
                    sig.confidence,
                );
            }
        }

        // Text heuristics: JSON and XML before generic text.
        if let Ok(text) = std::str::from_utf8(payload) {
            let trimmed = text.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
            {
                return ("application/json".to_string(), Some("json".to_string()), 0.9);
            }
            if trimmed.starts_with("<?xml") {
                return ("application/xml".to_string(), Some("xml".to_string()), 0.9);
            }
            if !payload.is_empty() {
                return ("text/plain".to_string(), Some("txt".to_string()), 0.6);
            }
        }

        ("application/octet-stream".to_string(), None, 0.1)
    }
}

#[async_trait]
impl EngineTransport for SignatureEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn cost(&self) -> f32 {
        0.1
    }

    async fn probe(&self) -> Result<EngineStatus, ScanError> {
        Ok(EngineStatus::Available)
    }

    async fn detect(&self, payload: &[u8]) -> Result<EngineReport, ScanError> {
        let start = Instant::now();
        let (media_type, extension, confidence) = Self::classify(payload);
        Ok(EngineReport {
            engine: Self::NAME.to_string(),
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            media_type,
            confidence,
            extension,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            malware_score: None,
            hashes: None,
            metadata: None,
            extra: serde_json::Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn detect(payload: &[u8]) -> EngineReport {
        SignatureEngine::new().detect(payload).await.unwrap()
    }

    #[tokio::test]
    async fn test_detects_pdf() {
        let report = detect(b"%PDF-1.7 rest of file").await;
        assert_eq!(report.media_type, "application/pdf");
        assert_eq!(report.extension.as_deref(), Some("pdf"));
        assert!(report.confidence > 0.9);
    }

    #[tokio::test]
    async fn test_detects_png() {
        let mut payload = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        payload.extend_from_slice(&[0; 16]);
        let report = detect(&payload).await;
        assert_eq!(report.media_type, "image/png");
    }

    #[tokio::test]
    async fn test_detects_tar_at_offset() {
        let mut payload = vec![0u8; 512];
        payload[257..262].copy_from_slice(b"ustar");
        let report = detect(&payload).await;
        assert_eq!(report.media_type, "application/x-tar");
    }

    #[tokio::test]
    async fn test_detects_json_over_text() {
        let report = detect(br#"{"a": 1, "b": [2, 3]}"#).await;
        assert_eq!(report.media_type, "application/json");
    }

    #[tokio::test]
    async fn test_plain_text_fallback() {
        let report = detect(b"hello world, nothing magic here").await;
        assert_eq!(report.media_type, "text/plain");
        assert_eq!(report.confidence, 0.6);
    }

    #[tokio::test]
    async fn test_unknown_binary_fallback() {
        let report = detect(&[0x00, 0x01, 0x02, 0xFE, 0xFF]).await;
        assert_eq!(report.media_type, "application/octet-stream");
        assert_eq!(report.extension, None);
        assert!(report.confidence < 0.2);
    }

    #[tokio::test]
    async fn test_short_payload_does_not_panic() {
        let report = detect(b"P").await;
        assert_eq!(report.media_type, "text/plain");
    }
}
