//! Scan-job orchestration.
//!
//! The [`Orchestrator`] owns the whole pipeline for a submitted file:
//! options validation, content hashing (a gating step, before any engine
//! runs), engine invocation through [`sonde_engines::Invoker`],
//! normalization into the canonical result, downstream security assessment,
//! and the single append into the history store. Batches run through a FIFO
//! queue drained by a fixed-size worker pool.

pub mod batch;
pub mod hashing;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod security;
pub mod status;

pub use metrics::{LiveMetrics, LiveSnapshot};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use status::{JobStatus, StatusService};
