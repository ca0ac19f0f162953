//! Single-engine invocation with size gating, timeout, and cancellation.

use sonde_protocol::{EngineReport, ScanError, ScanOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::registry::EngineRegistry;

/// Runs one engine against one payload.
///
/// Stateless apart from the registry handle: safe to call concurrently for
/// different (engine, payload) pairs.
#[derive(Clone)]
pub struct Invoker {
    registry: Arc<EngineRegistry>,
}

impl Invoker {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Invoke `engine_name` on `payload`.
    ///
    /// Order of gates is part of the contract: the size limit is enforced
    /// before any engine is touched, and a timeout or cancel cuts the
    /// invocation through the same path (the engine future is dropped, which
    /// kills a subprocess child).
    pub async fn invoke(
        &self,
        engine_name: &str,
        payload: &[u8],
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<EngineReport, ScanError> {
        if payload.len() as u64 > options.max_file_size_bytes {
            return Err(ScanError::FileTooLarge {
                size: payload.len() as u64,
                limit: options.max_file_size_bytes,
            });
        }

        let transport = self.registry.get(engine_name).ok_or_else(|| {
            ScanError::engine_failure(engine_name, "engine is not registered")
        })?;
        if !self.registry.is_available(engine_name) {
            return Err(ScanError::engine_failure(
                engine_name,
                "engine is not available",
            ));
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let deadline = Duration::from_millis(options.timeout_ms);
        let report = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("invocation of '{}' cancelled", engine_name);
                return Err(ScanError::Cancelled);
            }

            outcome = tokio::time::timeout(deadline, transport.detect(payload)) => match outcome {
                Err(_) => {
                    return Err(ScanError::EngineTimeout {
                        engine: engine_name.to_string(),
                        timeout_ms: options.timeout_ms,
                    });
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(report)) => report,
            }
        };

        validate_report(engine_name, report)
    }
}

/// Boundary validation of a raw report: loosely-typed engine output is not
/// trusted past this point.
fn validate_report(engine_name: &str, report: EngineReport) -> Result<EngineReport, ScanError> {
    if !report.confidence.is_finite() || !(0.0..=1.0).contains(&report.confidence) {
        return Err(ScanError::engine_failure(
            engine_name,
            format!("confidence {} outside [0, 1]", report.confidence),
        ));
    }
    if let Some(score) = report.malware_score {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(ScanError::engine_failure(
                engine_name,
                format!("malware_score {} outside [0, 1]", score),
            ));
        }
    }
    if report.media_type.is_empty() {
        return Err(ScanError::engine_failure(
            engine_name,
            "empty media_type in report",
        ));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EngineTransport;
    use async_trait::async_trait;
    use sonde_protocol::EngineStatus;
    use std::time::Instant;

    /// Fake engine with scripted behavior.
    struct FakeEngine {
        name: &'static str,
        confidence: f32,
        delay: Duration,
    }

    #[async_trait]
    impl EngineTransport for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "test"
        }
        fn cost(&self) -> f32 {
            0.1
        }
        async fn probe(&self) -> Result<EngineStatus, ScanError> {
            Ok(EngineStatus::Available)
        }
        async fn detect(&self, _payload: &[u8]) -> Result<EngineReport, ScanError> {
            tokio::time::sleep(self.delay).await;
            Ok(EngineReport {
                engine: self.name.to_string(),
                engine_version: None,
                media_type: "application/test".to_string(),
                confidence: self.confidence,
                extension: None,
                elapsed_ms: 1.0,
                malware_score: None,
                hashes: None,
                metadata: None,
                extra: serde_json::Map::new(),
            })
        }
    }

    async fn invoker_with(engine: FakeEngine) -> Invoker {
        let registry = EngineRegistry::with_transports(vec![Arc::new(engine)])
            .await
            .unwrap();
        Invoker::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_size_gate_fires_before_engine() {
        let invoker = invoker_with(FakeEngine {
            name: "fake",
            confidence: 0.5,
            delay: Duration::ZERO,
        })
        .await;
        let options = ScanOptions {
            max_file_size_bytes: 4,
            ..Default::default()
        };
        let err = invoker
            .invoke("fake", b"five!", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "file_too_large");
    }

    #[tokio::test]
    async fn test_timeout_returns_promptly() {
        let invoker = invoker_with(FakeEngine {
            name: "slow",
            confidence: 0.5,
            delay: Duration::from_secs(3600),
        })
        .await;
        let options = ScanOptions {
            timeout_ms: 100,
            ..Default::default()
        };

        let start = Instant::now();
        let err = invoker
            .invoke("slow", b"x", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err.kind(), "engine_timeout");
        assert!(
            elapsed < Duration::from_millis(150),
            "timeout took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_cancel_cuts_invocation() {
        let invoker = invoker_with(FakeEngine {
            name: "slow",
            confidence: 0.5,
            delay: Duration::from_secs(3600),
        })
        .await;
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });

        let err = invoker
            .invoke("slow", b"x", &ScanOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_rejected() {
        let invoker = invoker_with(FakeEngine {
            name: "wild",
            confidence: 1.5,
            delay: Duration::ZERO,
        })
        .await;
        let err = invoker
            .invoke("wild", b"x", &ScanOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "engine_failure");
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[tokio::test]
    async fn test_unknown_engine() {
        let invoker = invoker_with(FakeEngine {
            name: "fake",
            confidence: 0.5,
            delay: Duration::ZERO,
        })
        .await;
        let err = invoker
            .invoke("nope", b"x", &ScanOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "engine_failure");
        assert!(err.to_string().contains("not registered"));
    }
}
