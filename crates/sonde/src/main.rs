//! sonde unified launcher: CLI commands plus the HTTP API server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sonde_engines::{EngineDefinition, EngineRegistry};
use sonde_logging::LogConfig;
use sonde_orchestrator::{Orchestrator, OrchestratorConfig, StatusService};
use sonde_protocol::{FileOutcome, HistoryRecord, ScanOptions};
use sonde_store::HistoryStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

mod api;
mod walk;

use walk::WalkFilters;

#[derive(Parser, Debug)]
#[command(name = "sonde", about = "Content-detection scan orchestrator")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Register an external engine: NAME=COMMAND [ARGS...]
    /// Can be specified multiple times.
    #[arg(long = "engine", global = true, value_name = "NAME=CMD")]
    engines: Vec<String>,

    /// History database path (default: ~/.sonde/history.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8750")]
        bind: String,

        /// Worker pool size for batch scans (1-32)
        #[arg(long, default_value_t = 8)]
        pool_size: usize,
    },

    /// Scan files or directories
    Scan {
        /// Files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Restrict detection to these engines
        #[arg(long = "only", value_name = "ENGINE")]
        only: Vec<String>,

        /// Worker pool size for batches (1-32)
        #[arg(short = 'w', long, default_value_t = 8)]
        workers: usize,

        /// Glob pattern applied when walking directories
        #[arg(long)]
        pattern: Option<String>,

        /// Only analyse files with these extensions
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Directory names to skip during walks
        #[arg(long = "ignore", value_name = "DIR")]
        ignore: Vec<String>,

        /// Skip content hashing
        #[arg(long)]
        no_hashes: bool,

        /// Skip deep analysis (structure + security assessment)
        #[arg(long)]
        no_deep: bool,

        /// Reuse results for byte-identical files within the batch
        #[arg(long)]
        skip_duplicates: bool,

        /// Per-engine timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Reject files larger than this many bytes
        #[arg(long, default_value_t = 100 * 1024 * 1024)]
        max_file_size: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered engines
    Engines {
        /// Include live status and usage statistics
        #[arg(long)]
        status: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent scan history
    History {
        /// Maximum records to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show system metrics
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = sonde_logging::init_logging(LogConfig {
        app_name: "sonde",
        verbose: cli.verbose,
    }) {
        eprintln!("warning: logging init failed: {:#}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let definitions = engine_definitions(&cli.engines)?;

    match cli.command {
        Commands::Serve { bind, pool_size } => {
            let orchestrator =
                build_orchestrator(definitions, cli.db, pool_size, None).await?;
            info!("sonde API starting");
            api::serve(api::AppState::new(orchestrator), &bind).await
        }

        Commands::Scan {
            paths,
            only,
            workers,
            pattern,
            extensions,
            ignore,
            no_hashes,
            no_deep,
            skip_duplicates,
            timeout_ms,
            max_file_size,
            json,
        } => {
            let options = ScanOptions {
                engines: only,
                deep_analysis: !no_deep,
                generate_hashes: !no_hashes,
                skip_duplicates,
                timeout_ms,
                max_file_size_bytes: max_file_size,
                ..Default::default()
            };
            let orchestrator =
                build_orchestrator(definitions, cli.db, workers, Some(options.clone())).await?;

            let filters = WalkFilters {
                pattern,
                extensions,
                ignore,
            };
            let mut files = walk::collect_files(&paths, &filters)?;
            if files.is_empty() {
                bail!("no files matched");
            }

            if files.len() == 1 {
                let (filename, payload) = files.remove(0);
                let result = orchestrator
                    .scan_single(&filename, &payload, Some(options))
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print_result(&result);
                }
            } else {
                let batch_id = orchestrator.submit_batch(files, Some(options)).await?;
                let snapshot = orchestrator.wait_batch(&batch_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    for outcome in &snapshot.results {
                        print_outcome(outcome);
                    }
                    println!(
                        "batch {}: {} files, {} ok, {} failed, {} skipped",
                        snapshot.batch_id,
                        snapshot.total_files,
                        snapshot.completed,
                        snapshot.failed,
                        snapshot.skipped
                    );
                }
            }
            Ok(())
        }

        Commands::Engines { status, json } => {
            let orchestrator = build_orchestrator(definitions, cli.db, 1, None).await?;
            if status {
                let service = StatusService::new(orchestrator);
                let entries = service.engine_status().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    for (name, entry) in entries {
                        println!(
                            "{:<16} {:<12} v{:<8} scans={} avg={:.1}ms",
                            name,
                            entry.status,
                            entry.version,
                            entry.stats.scans_completed,
                            entry.stats.avg_time_ms
                        );
                    }
                }
            } else {
                let engines = orchestrator.registry().list();
                if json {
                    println!("{}", serde_json::to_string_pretty(&engines)?);
                } else {
                    for engine in engines {
                        println!(
                            "{:<16} {:<12} v{} (cost {:.1})",
                            engine.name, engine.status, engine.version, engine.cost
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::History { limit, json } => {
            let orchestrator = build_orchestrator(definitions, cli.db, 1, None).await?;
            let records = orchestrator.store().list(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("history is empty");
            } else {
                for record in records {
                    print_record(&record);
                }
            }
            Ok(())
        }

        Commands::Metrics { json } => {
            let orchestrator = build_orchestrator(definitions, cli.db, 1, None).await?;
            let service = StatusService::new(orchestrator);
            let metrics = service.system_metrics().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                println!(
                    "cpu {:.1}%  mem {:.1}% ({}/{} MB)  disk {:.1}%",
                    metrics.cpu_usage,
                    metrics.memory_usage,
                    metrics.memory_used / 1_000_000,
                    metrics.memory_total / 1_000_000,
                    metrics.disk_usage
                );
                println!(
                    "scans total={}  active workers={}",
                    metrics.total_scans, metrics.active_workers
                );
                for (engine, stats) in metrics.engine_stats {
                    println!(
                        "  {:<16} scans={} avg={:.1}ms",
                        engine, stats.scans_completed, stats.avg_time_ms
                    );
                }
            }
            Ok(())
        }
    }
}

/// Parse repeatable `--engine NAME=COMMAND [ARGS...]` flags.
fn engine_definitions(specs: &[String]) -> Result<Vec<EngineDefinition>> {
    let mut definitions = EngineDefinition::defaults();
    for spec in specs {
        let (name, command_line) = spec
            .split_once('=')
            .with_context(|| format!("bad --engine '{}', expected NAME=COMMAND", spec))?;
        let mut parts = command_line.split_whitespace();
        let command = parts
            .next()
            .with_context(|| format!("bad --engine '{}', empty command", spec))?;
        definitions.push(EngineDefinition::Subprocess {
            name: name.trim().to_string(),
            version: "external".to_string(),
            cost: 1.0,
            command: PathBuf::from(command),
            args: parts.map(|s| s.to_string()).collect(),
        });
    }
    Ok(definitions)
}

async fn build_orchestrator(
    definitions: Vec<EngineDefinition>,
    db: Option<PathBuf>,
    pool_size: usize,
    default_options: Option<ScanOptions>,
) -> Result<Arc<Orchestrator>> {
    let registry = EngineRegistry::discover(definitions)
        .await
        .context("engine discovery failed")?;

    let db_path = db.unwrap_or_else(|| sonde_logging::sonde_home().join("history.db"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let store = HistoryStore::open(&db_path)
        .await
        .with_context(|| format!("cannot open history store {}", db_path.display()))?;

    let config = OrchestratorConfig {
        pool_size,
        default_options: default_options.unwrap_or_default(),
        ..Default::default()
    };
    Ok(Arc::new(Orchestrator::new(
        config,
        Arc::new(registry),
        store,
    )))
}

fn print_result(result: &sonde_protocol::ScanResult) {
    let threat = result
        .security
        .as_ref()
        .map(|s| s.threat_level.as_str())
        .unwrap_or("-");
    println!(
        "{:<40} {:<32} conf={:.2} threat={} engines={} {}ms",
        result.filename,
        result.detected_type,
        result.confidence,
        threat,
        result.engines_used.join(","),
        result.scan_duration_ms
    );
}

fn print_outcome(outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Scanned(result) => print_result(result),
        FileOutcome::Failed(marker) => {
            println!(
                "{:<40} FAILED [{}] {}",
                marker.filename, marker.error_kind, marker.message
            );
        }
        FileOutcome::Skipped { filename, reason } => {
            println!("{:<40} SKIPPED {}", filename, reason);
        }
    }
}

fn print_record(record: &HistoryRecord) {
    match record {
        HistoryRecord::Scan(result) => {
            println!(
                "{}  {:<40} {:<32} conf={:.2}",
                result.timestamp.format("%Y-%m-%d %H:%M:%S"),
                result.filename,
                result.detected_type,
                result.confidence
            );
        }
        HistoryRecord::Failure(marker) => {
            println!(
                "{}  {:<40} FAILED [{}]",
                marker.timestamp.format("%Y-%m-%d %H:%M:%S"),
                marker.filename,
                marker.error_kind
            );
        }
    }
}
