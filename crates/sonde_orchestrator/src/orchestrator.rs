//! The scan orchestrator: submission, pipeline, and the batch worker pool.

use chrono::Utc;
use sonde_engines::{CancellationToken, EngineRegistry, Invoker};
use sonde_protocol::{
    new_id, BatchSnapshot, BatchStatus, EngineReport, FailureRecord, FileOutcome, HistoryRecord,
    ScanError, ScanOptions, ScanResult,
};
use sonde_store::HistoryStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchControl, BatchState};
use crate::hashing::hash_bytes;
use crate::metrics::LiveMetrics;
use crate::normalize::{self, NormalizeInput};
use crate::security;

/// Worker pool bounds. Operator-tunable within this range at construction.
pub const MIN_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 32;

/// Explicit orchestrator configuration, passed in at construction.
/// There is no process-wide mutable config.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of pool workers draining a batch queue; at most this many
    /// file-scans are in flight at once.
    pub pool_size: usize,
    /// Run the downstream security assessor on deep scans.
    pub security_assessment: bool,
    /// Options applied when a submission does not carry its own.
    pub default_options: ScanOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            security_assessment: true,
            default_options: ScanOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn clamped_pool_size(&self) -> usize {
        self.pool_size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    }
}

/// One submitted file: name plus content.
pub type BatchFile = (String, Vec<u8>);

/// Per-batch duplicate cache, keyed by sha256. Shared by pool workers.
#[derive(Default)]
struct DedupCache {
    inner: Mutex<HashMap<String, ScanResult>>,
}

impl DedupCache {
    fn get(&self, sha256: &str) -> Option<ScanResult> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(sha256)
            .cloned()
    }

    fn insert(&self, sha256: String, result: ScanResult) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(sha256)
            .or_insert(result);
    }
}

/// Everything a pool worker needs to run the per-file pipeline. Cheap to
/// clone: handles only.
#[derive(Clone)]
struct PipelineContext {
    invoker: Invoker,
    store: HistoryStore,
    metrics: Arc<LiveMetrics>,
    security_assessment: bool,
}

/// Central coordinator for scan jobs.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<EngineRegistry>,
    ctx: PipelineContext,
    batches: Mutex<HashMap<String, Arc<BatchState>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<EngineRegistry>,
        store: HistoryStore,
    ) -> Self {
        let ctx = PipelineContext {
            invoker: Invoker::new(registry.clone()),
            store,
            metrics: Arc::new(LiveMetrics::new()),
            security_assessment: config.security_assessment,
        };
        Self {
            config,
            registry,
            ctx,
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn store(&self) -> &HistoryStore {
        &self.ctx.store
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.ctx.metrics
    }

    // ------------------------------------------------------------------
    // Single-file scans
    // ------------------------------------------------------------------

    /// Scan one file synchronously through the full pipeline.
    ///
    /// The completed result is appended to history exactly once before it is
    /// returned; a failure surfaces as a typed error and persists nothing.
    pub async fn scan_single(
        &self,
        filename: &str,
        payload: &[u8],
        options: Option<ScanOptions>,
    ) -> Result<ScanResult, ScanError> {
        let options = options.unwrap_or_else(|| self.config.default_options.clone());
        options.validate()?;
        let engines = self.select_engines(&options)?;

        self.ctx.metrics.inc_scans_started();
        let cancel = CancellationToken::new();
        match self
            .ctx
            .scan_pipeline(filename, payload, &options, &engines, &cancel, None)
            .await
        {
            Ok(result) => {
                if let Err(e) = self
                    .ctx
                    .store
                    .append(&HistoryRecord::Scan(result.clone()))
                    .await
                {
                    self.ctx.metrics.inc_scans_failed();
                    return Err(e.into());
                }
                self.ctx.metrics.inc_scans_completed();
                Ok(result)
            }
            Err(e) => {
                self.ctx.metrics.inc_scans_failed();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Batch scans
    // ------------------------------------------------------------------

    /// Submit a batch. Returns the batch id immediately; progress is
    /// observable through the status service.
    ///
    /// Files queue in submission order and are admitted to exactly
    /// `pool_size` workers as slots free up; there is no per-file spawning.
    pub async fn submit_batch(
        &self,
        files: Vec<BatchFile>,
        options: Option<ScanOptions>,
    ) -> Result<String, ScanError> {
        let options = options.unwrap_or_else(|| self.config.default_options.clone());
        options.validate()?;
        let engines = self.select_engines(&options)?;

        let batch_id = new_id("batch");
        let batch = BatchState::new(batch_id.clone(), files.len());
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(batch_id.clone(), batch.clone());

        info!(
            "batch {} submitted: {} files, pool size {}",
            batch_id,
            files.len(),
            self.config.clamped_pool_size()
        );

        if files.is_empty() {
            return Ok(batch_id);
        }

        // FIFO admission queue, preloaded in submission order.
        let (tx, rx) = mpsc::channel(files.len());
        for file in files {
            // Capacity equals the file count, so this never blocks.
            if tx.send(file).await.is_err() {
                break;
            }
        }
        drop(tx);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let dedup = Arc::new(DedupCache::default());

        for worker_id in 0..self.config.clamped_pool_size() {
            let ctx = self.ctx.clone();
            let batch = batch.clone();
            let queue = queue.clone();
            let options = options.clone();
            let engines = engines.clone();
            let dedup = dedup.clone();
            tokio::spawn(async move {
                worker_loop(ctx, worker_id, batch, queue, options, engines, dedup).await;
            });
        }

        Ok(batch_id)
    }

    /// Resolve the engine set for a submission.
    ///
    /// An explicit restriction naming an unknown engine is an options error;
    /// an empty restriction with nothing available is a registry problem the
    /// caller must see.
    fn select_engines(&self, options: &ScanOptions) -> Result<Vec<String>, ScanError> {
        if options.engines.is_empty() {
            let names = self.registry.available_names();
            if names.is_empty() {
                return Err(ScanError::EngineRegistryUnavailable(
                    "no detection engines are available".to_string(),
                ));
            }
            Ok(names)
        } else {
            let mut names = options.engines.clone();
            names.sort();
            names.dedup();
            for name in &names {
                if !self.registry.contains(name) {
                    return Err(ScanError::InvalidOptions(format!(
                        "unknown engine '{}'",
                        name
                    )));
                }
            }
            Ok(names)
        }
    }

    // ------------------------------------------------------------------
    // Batch control and lookup
    // ------------------------------------------------------------------

    fn batch(&self, batch_id: &str) -> Result<Arc<BatchState>, ScanError> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(batch_id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(batch_id.to_string()))
    }

    pub fn batch_snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(batch_id)
            .map(|b| b.snapshot())
    }

    pub fn pause_batch(&self, batch_id: &str) -> Result<BatchStatus, ScanError> {
        Ok(self.batch(batch_id)?.pause())
    }

    pub fn resume_batch(&self, batch_id: &str) -> Result<BatchStatus, ScanError> {
        Ok(self.batch(batch_id)?.resume())
    }

    pub fn cancel_batch(&self, batch_id: &str) -> Result<BatchStatus, ScanError> {
        Ok(self.batch(batch_id)?.cancel_batch())
    }

    /// Block until the batch reaches a terminal state, then return the final
    /// snapshot.
    pub async fn wait_batch(&self, batch_id: &str) -> Result<BatchSnapshot, ScanError> {
        let batch = self.batch(batch_id)?;
        batch.wait_terminal().await;
        Ok(batch.snapshot())
    }
}

/// One pool worker: pull from the shared FIFO queue until drained.
async fn worker_loop(
    ctx: PipelineContext,
    worker_id: usize,
    batch: Arc<BatchState>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<BatchFile>>>,
    options: ScanOptions,
    engines: Vec<String>,
    dedup: Arc<DedupCache>,
) {
    debug!("worker {} started for batch {}", worker_id, batch.batch_id);
    let mut control = batch.control_rx();
    loop {
        // Honor pause before pulling new work. Cancel short-circuits the
        // wait so queued entries can drain as skipped.
        loop {
            if batch.cancel.is_cancelled() || *control.borrow() == BatchControl::Running {
                break;
            }
            if control.changed().await.is_err() {
                break;
            }
        }

        let item = { queue.lock().await.recv().await };
        let Some((filename, payload)) = item else {
            break;
        };
        batch.mark_running();

        if batch.cancel.is_cancelled() {
            ctx.metrics.inc_files_skipped();
            batch.record_outcome(FileOutcome::Skipped {
                filename,
                reason: "batch cancelled before scan started".to_string(),
            });
            continue;
        }

        let _guard = ctx.metrics.worker_guard();
        ctx.metrics.inc_scans_started();
        let outcome = ctx
            .scan_pipeline(
                &filename,
                &payload,
                &options,
                &engines,
                &batch.cancel,
                Some(&dedup),
            )
            .await;

        match outcome {
            Ok(result) => match ctx.store.append(&HistoryRecord::Scan(result.clone())).await {
                Ok(()) => {
                    ctx.metrics.inc_scans_completed();
                    batch.record_outcome(FileOutcome::Scanned(result));
                }
                Err(e) => {
                    error!(
                        "batch {} aborted: cannot persist result for '{}': {}",
                        batch.batch_id, filename, e
                    );
                    ctx.metrics.inc_scans_failed();
                    batch.mark_failed();
                }
            },
            Err(ScanError::Cancelled) => {
                ctx.metrics.inc_files_skipped();
                batch.record_outcome(FileOutcome::Skipped {
                    filename,
                    reason: "batch cancelled".to_string(),
                });
            }
            Err(e) => {
                warn!(
                    "batch {}: file '{}' failed: {}",
                    batch.batch_id, filename, e
                );
                ctx.metrics.inc_scans_failed();
                let marker = FailureRecord {
                    id: new_id("scan"),
                    filename: filename.clone(),
                    error_kind: e.kind().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                };
                match ctx
                    .store
                    .append(&HistoryRecord::Failure(marker.clone()))
                    .await
                {
                    Ok(()) => batch.record_outcome(FileOutcome::Failed(marker)),
                    Err(store_err) => {
                        error!(
                            "batch {} aborted: cannot persist failure marker: {}",
                            batch.batch_id, store_err
                        );
                        batch.mark_failed();
                    }
                }
            }
        }
    }
    debug!("worker {} drained for batch {}", worker_id, batch.batch_id);
}

impl PipelineContext {
    /// Validate, hash, invoke, assess, normalize. Persistence stays with the
    /// caller so batch workers and single scans each append exactly once.
    async fn scan_pipeline(
        &self,
        filename: &str,
        payload: &[u8],
        options: &ScanOptions,
        engines: &[String],
        cancel: &CancellationToken,
        dedup: Option<&DedupCache>,
    ) -> Result<ScanResult, ScanError> {
        let start = Instant::now();

        // Size gate before hashing or any engine contact.
        if payload.len() as u64 > options.max_file_size_bytes {
            return Err(ScanError::FileTooLarge {
                size: payload.len() as u64,
                limit: options.max_file_size_bytes,
            });
        }

        // Hashing gates engine invocation: duplicate detection needs the
        // digest before the first engine call.
        let hashes =
            (options.generate_hashes || options.skip_duplicates).then(|| hash_bytes(payload));

        if options.skip_duplicates {
            if let (Some(cache), Some(h)) = (dedup, hashes.as_ref()) {
                if let Some(prior) = cache.get(&h.sha256) {
                    debug!("duplicate content for '{}', reusing prior result", filename);
                    self.metrics.inc_duplicates_reused();
                    let mut reused = prior;
                    reused.id = new_id("scan");
                    reused.filename = filename.to_string();
                    reused.timestamp = Utc::now();
                    return Ok(reused);
                }
            }
        }

        let mut reports: Vec<EngineReport> = Vec::with_capacity(engines.len());
        let mut first_error: Option<ScanError> = None;
        for engine in engines {
            self.metrics.inc_engine_invocations();
            match self.invoker.invoke(engine, payload, options, cancel).await {
                Ok(report) => reports.push(report),
                // A cancelled invocation cancels the whole file.
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => {
                    warn!("engine '{}' failed on '{}': {}", engine, filename, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if reports.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                ScanError::engine_failure("none", "no engines produced a report")
            }));
        }

        let metadata = if options.extract_metadata {
            normalize::merge_engine_metadata(&reports)
        } else {
            None
        };

        let security = if self.security_assessment && options.deep_analysis {
            // select_primary is Some: reports is non-empty here.
            normalize::select_primary(&reports)
                .map(|primary| security::assess(payload.len() as u64, filename, primary))
        } else {
            None
        };

        let structure = options.deep_analysis.then(|| {
            let suspicious = security
                .as_ref()
                .map(|s| !s.anomalies.is_empty())
                .unwrap_or(false);
            let mut map = serde_json::Map::new();
            map.insert("valid".to_string(), serde_json::Value::Bool(true));
            map.insert("corrupted".to_string(), serde_json::Value::Bool(false));
            map.insert(
                "suspicious".to_string(),
                serde_json::Value::Bool(suspicious),
            );
            map
        });

        let result = normalize::normalize(NormalizeInput {
            filename,
            size_bytes: payload.len() as u64,
            reports: &reports,
            hashes,
            metadata,
            structure,
            security,
            scan_duration_ms: start.elapsed().as_millis() as u64,
        })?;

        if options.skip_duplicates {
            if let (Some(cache), Some(h)) = (dedup, result.hashes.as_ref()) {
                cache.insert(h.sha256.clone(), result.clone());
            }
        }

        Ok(result)
    }
}
