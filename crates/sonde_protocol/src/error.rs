//! Error taxonomy for scan submission and engine invocation.
//!
//! Every failure path in the orchestrator maps onto exactly one of these
//! variants; `kind()` is the stable string persisted in failure markers and
//! returned over the API, so renaming a variant is a wire change.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// File rejected before any engine was touched.
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// Engine did not answer within the configured deadline. The invocation
    /// is cancelled on expiry, never left running.
    #[error("engine '{engine}' timed out after {timeout_ms}ms")]
    EngineTimeout { engine: String, timeout_ms: u64 },

    /// Engine ran but reported an error (non-zero exit, malformed report).
    /// Distinct from a successful-but-low-confidence result.
    #[error("engine '{engine}' failed: {message}")]
    EngineFailure { engine: String, message: String },

    /// The discovery mechanism itself could not run. Callers must see this
    /// distinctly from "zero engines configured".
    #[error("engine registry unavailable: {0}")]
    EngineRegistryUnavailable(String),

    /// Unknown job or result id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed scan options, rejected at submission.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// History store append failed; the submission is aborted.
    #[error("storage write failure: {0}")]
    StorageWriteFailure(String),

    /// Invocation cut by an operator cancel request. Queued files in a
    /// cancelled batch are skipped, not failed.
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Stable kind string used in failure markers and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::FileTooLarge { .. } => "file_too_large",
            ScanError::EngineTimeout { .. } => "engine_timeout",
            ScanError::EngineFailure { .. } => "engine_failure",
            ScanError::EngineRegistryUnavailable(_) => "engine_registry_unavailable",
            ScanError::NotFound(_) => "not_found",
            ScanError::InvalidOptions(_) => "invalid_options",
            ScanError::StorageWriteFailure(_) => "storage_write_failure",
            ScanError::Cancelled => "cancelled",
        }
    }

    /// Errors that abort the whole submission rather than a single file.
    pub fn is_submission_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::EngineRegistryUnavailable(_)
                | ScanError::InvalidOptions(_)
                | ScanError::StorageWriteFailure(_)
        )
    }

    pub fn engine_failure(engine: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::EngineFailure {
            engine: engine.into(),
            message: message.into(),
        }
    }
}
