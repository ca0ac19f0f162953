//! The execution-transport seam between the orchestrator and engines.

use async_trait::async_trait;
use sonde_protocol::{EngineReport, EngineStatus, ScanError};

/// An executable detection engine.
///
/// Implementations must be safe to call concurrently for different payloads:
/// no shared mutable state between invocations. Timeout enforcement is the
/// invoker's job, but implementations must tolerate their `detect` future
/// being dropped mid-flight (a dropped subprocess future must kill its
/// child).
#[async_trait]
pub trait EngineTransport: Send + Sync {
    /// Registered engine name, unique within a registry.
    fn name(&self) -> &str;

    /// Version string advertised in the engine listing.
    fn version(&self) -> &str;

    /// Relative invocation cost (cheap in-process probes ~0.1, spawned
    /// tools ~1.0).
    fn cost(&self) -> f32;

    /// Probe the backing implementation.
    ///
    /// `Ok(status)` is a clean answer, including `Unavailable` for a missing
    /// binary. `Err` means the probe mechanism itself could not run; the
    /// registry folds that into `EngineRegistryUnavailable` when no engine
    /// can be probed at all.
    async fn probe(&self) -> Result<EngineStatus, ScanError>;

    /// Classify one payload.
    async fn detect(&self, payload: &[u8]) -> Result<EngineReport, ScanError>;
}

/// Truncate engine diagnostics so a chatty stderr cannot bloat error
/// records.
pub(crate) fn truncate_diagnostic(text: &str) -> String {
    const MAX: usize = 500;
    if text.len() > MAX {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &text[..end])
    } else {
        text.to_string()
    }
}
