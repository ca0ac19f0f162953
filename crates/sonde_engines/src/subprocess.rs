//! Subprocess engine adapter.
//!
//! Spawns a configured external program per invocation, hands it the payload
//! through a temp file path argument, and reads one JSON report from stdout.
//! The child is spawned with kill-on-drop so a timed-out or cancelled
//! invocation never leaves a process running.

use async_trait::async_trait;
use sonde_protocol::{EngineReport, EngineStatus, ScanError};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::transport::{truncate_diagnostic, EngineTransport};

/// An external detection engine reachable as a spawned process.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    name: String,
    version: String,
    cost: f32,
    command: PathBuf,
    args: Vec<String>,
}

impl SubprocessEngine {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        cost: f32,
        command: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            cost,
            command: command.into(),
            args,
        }
    }

    fn parse_report(&self, stdout: &[u8]) -> Result<EngineReport, ScanError> {
        let mut report: EngineReport = serde_json::from_slice(stdout).map_err(|e| {
            ScanError::engine_failure(
                &self.name,
                format!("malformed engine report: {}", e),
            )
        })?;
        // The registered name wins over whatever the program calls itself.
        report.engine = self.name.clone();
        if report.engine_version.is_none() {
            report.engine_version = Some(self.version.clone());
        }
        Ok(report)
    }
}

#[async_trait]
impl EngineTransport for SubprocessEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn cost(&self) -> f32 {
        self.cost
    }

    async fn probe(&self) -> Result<EngineStatus, ScanError> {
        match which::which(&self.command) {
            Ok(path) => {
                debug!("engine '{}' resolved to {}", self.name, path.display());
                Ok(EngineStatus::Available)
            }
            Err(which::Error::CannotFindBinaryPath) => Ok(EngineStatus::Unavailable),
            // PATH machinery itself is broken - this is a probe failure, not
            // a missing binary.
            Err(e) => Err(ScanError::EngineRegistryUnavailable(format!(
                "cannot probe engine '{}': {}",
                self.name, e
            ))),
        }
    }

    async fn detect(&self, payload: &[u8]) -> Result<EngineReport, ScanError> {
        let start = Instant::now();

        // The temp file must outlive the child; dropped on return.
        let mut tmp = tempfile::NamedTempFile::new().map_err(|e| {
            ScanError::engine_failure(&self.name, format!("cannot stage payload: {}", e))
        })?;
        tmp.write_all(payload).map_err(|e| {
            ScanError::engine_failure(&self.name, format!("cannot stage payload: {}", e))
        })?;
        tmp.flush().map_err(|e| {
            ScanError::engine_failure(&self.name, format!("cannot stage payload: {}", e))
        })?;

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(tmp.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ScanError::engine_failure(&self.name, format!("failed to spawn: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ScanError::engine_failure(
                &self.name,
                format!(
                    "exited with status {}: {}",
                    code,
                    truncate_diagnostic(stderr.trim())
                ),
            ));
        }

        let mut report = self.parse_report(&output.stdout)?;
        if report.elapsed_ms <= 0.0 {
            report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SubprocessEngine {
        SubprocessEngine::new("ext", "2.1.0", 1.0, "/usr/bin/true", vec![])
    }

    #[test]
    fn test_parse_report_overrides_engine_name() {
        let raw = br#"{"engine": "self-styled", "media_type": "text/csv", "confidence": 0.8}"#;
        let report = engine().parse_report(raw).unwrap();
        assert_eq!(report.engine, "ext");
        assert_eq!(report.engine_version.as_deref(), Some("2.1.0"));
        assert_eq!(report.media_type, "text/csv");
    }

    #[test]
    fn test_parse_report_rejects_garbage() {
        let err = engine().parse_report(b"not json").unwrap_err();
        assert_eq!(err.kind(), "engine_failure");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_engine_failure() {
        let engine = SubprocessEngine::new("false", "0", 1.0, "/bin/false", vec![]);
        let err = engine.detect(b"payload").await.unwrap_err();
        assert_eq!(err.kind(), "engine_failure");
        assert!(err.to_string().contains("exited with status"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_parses_stdout_report() {
        // `cat`-style engine: echo a canned report regardless of the payload
        // path appended as the final argument.
        let engine = SubprocessEngine::new(
            "echoer",
            "1.0",
            1.0,
            "/bin/sh",
            vec![
                "-c".to_string(),
                r#"echo '{"engine":"echoer","media_type":"application/test","confidence":0.5}'"#
                    .to_string(),
            ],
        );
        let report = engine.detect(b"anything").await.unwrap();
        assert_eq!(report.media_type, "application/test");
        assert!(report.elapsed_ms > 0.0);
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_unavailable() {
        let engine = SubprocessEngine::new(
            "ghost",
            "0",
            1.0,
            "definitely-not-a-real-binary-sonde",
            vec![],
        );
        assert_eq!(
            engine.probe().await.unwrap(),
            EngineStatus::Unavailable
        );
    }
}
