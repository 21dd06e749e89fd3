//! Benford Ingest - leading-digit extraction over a Wikipedia dump

use anyhow::Result;
use benford_common::logging::{init_logging, LogConfig, LogLevel};
use benford_ingest::checkpoint::ChunkStatus;
use benford_ingest::config::{CorruptCheckpointPolicy, PipelineConfig};
use benford_ingest::pipeline::{self, RunStatus};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const LOG_FILE_PREFIX: &str = "benford-ingest";
const EXIT_PARTIAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "benford-ingest")]
#[command(author, version, about = "Leading-digit extraction over a Wikipedia dump")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    paths: PathArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct PathArgs {
    /// Multistream archive (.xml.bz2, .xml.gz or .xml)
    #[arg(long, global = true)]
    archive: Option<PathBuf>,

    /// Multistream index (`offset:id:title` lines)
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Directory for the checkpoint, chunk artifacts and run report
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Final table (CSV)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Summary document (JSON)
    #[arg(long, global = true)]
    summary: Option<PathBuf>,

    /// Fail instead of starting fresh when the checkpoint is corrupt
    #[arg(long, global = true)]
    strict_checkpoint: bool,

    /// Refuse to merge when chunks failed permanently
    #[arg(long, global = true)]
    no_partial: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process pending chunks and merge the results
    Run {
        /// Discard any existing checkpoint
        #[arg(long)]
        fresh: bool,

        /// Only process the first N index entries
        #[arg(long)]
        sample: Option<usize>,

        /// Worker units (default: CPUs bounded by available memory)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Chunks to plan (default: 100, or the checkpoint's plan)
        #[arg(short, long)]
        chunks: Option<usize>,

        /// Failures allowed per chunk
        #[arg(long)]
        retry_ceiling: Option<u32>,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Show chunk states from the checkpoint
    Status,

    /// Merge finished chunks without processing any
    Merge,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env_with_prefix(LOG_FILE_PREFIX).unwrap_or_else(|_| {
        LogConfig::builder()
            .log_file_prefix(LOG_FILE_PREFIX)
            .build()
    });
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let guard = init_logging(&log_config)?;

    let config = build_config(&cli)?;
    let code = execute(cli.command, config).await?;

    // Flush the file appender before exiting with a status
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    let paths = &cli.paths;

    if let Some(archive) = &paths.archive {
        config.archive_path = archive.clone();
    }
    if let Some(index) = &paths.index {
        config.index_path = index.clone();
    }
    if let Some(dir) = &paths.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(output) = &paths.output {
        config.output_path = output.clone();
    }
    if let Some(summary) = &paths.summary {
        config.summary_path = summary.clone();
    }
    if paths.strict_checkpoint {
        config.checkpoint_policy = CorruptCheckpointPolicy::Strict;
    }
    if paths.no_partial {
        config.allow_partial = false;
    }

    if let Command::Run {
        fresh,
        sample,
        workers,
        chunks,
        retry_ceiling,
        progress,
    } = &cli.command
    {
        config.fresh = *fresh;
        config.sample = *sample;
        config.show_progress = *progress;
        if let Some(workers) = workers {
            config.workers = *workers;
        }
        if chunks.is_some() {
            config.chunks = *chunks;
        }
        if let Some(ceiling) = retry_ceiling {
            config.retry_ceiling = *ceiling;
        }
    }

    Ok(config)
}

async fn execute(command: Command, config: PipelineConfig) -> Result<i32> {
    match command {
        Command::Run { .. } => {
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, abandoning in-flight chunks");
                        cancel.cancel();
                    }
                }
            });

            let report = pipeline::run(&config, cancel).await?;
            println!(
                "{}: {} of {} chunks done, {} failed, {} records skipped, {} observations",
                report.status,
                report.chunks_done,
                report.chunks_total,
                report.chunks_failed,
                report.records_skipped,
                report.observations
            );
            if let (Some(table), Some(summary)) = (&report.table_path, &report.summary_path) {
                println!("table: {}\nsummary: {}", table.display(), summary.display());
            }

            Ok(match report.status {
                RunStatus::Complete => 0,
                RunStatus::Partial => EXIT_PARTIAL,
                RunStatus::Interrupted => EXIT_INTERRUPTED,
            })
        },

        Command::Status => {
            let Some(state) = pipeline::status(&config)? else {
                println!("No checkpoint at {}", config.checkpoint_path().display());
                return Ok(0);
            };
            let counts = state.counts();
            println!("run {} (created {})", state.run_id, state.created_at.to_rfc3339());
            println!(
                "chunks: {} total, {} done, {} pending, {} in progress, {} failed, {} failed final",
                counts.total(),
                counts.done,
                counts.pending,
                counts.in_progress,
                counts.failed,
                counts.failed_final
            );
            if state.plan.single_chunk_fallback {
                println!("plan: single chunk (archive boundaries could not be verified)");
            }
            for record in state
                .chunks
                .iter()
                .filter(|r| matches!(r.status, ChunkStatus::Failed | ChunkStatus::FailedFinal))
            {
                println!(
                    "  chunk {:>6} {:<12} retries={} {}",
                    record.chunk.ordinal,
                    record.status.as_str(),
                    record.retries,
                    record.last_error.as_deref().unwrap_or("")
                );
            }
            Ok(0)
        },

        Command::Merge => {
            let report = pipeline::merge(&config)?;
            info!(chunks = report.chunks_merged, "Merge complete");
            println!(
                "{} observations from {} chunks\ntable: {}\nsummary: {}",
                report.observations,
                report.chunks_merged,
                report.table_path.display(),
                report.summary_path.display()
            );
            Ok(if report.complete { 0 } else { EXIT_PARTIAL })
        },
    }
}
