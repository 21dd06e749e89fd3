//! Pipeline orchestration
//!
//! One run goes through these steps:
//!
//! 1. Validate the configuration and detect the archive format
//! 2. Load the checkpoint, or plan chunks from the index
//! 3. Drain the chunk queue with the worker pool
//! 4. Merge the artifacts once every chunk is terminal
//! 5. Write `run_report.json` next to the checkpoint

use crate::archive::{archive_len, ArchiveFormat};
use crate::checkpoint::{discard_state, load_state, CheckpointState, CheckpointStore, ChunkStatus};
use crate::config::{PipelineConfig, DEFAULT_CHUNK_COUNT};
use crate::error::{PipelineError, Result};
use crate::index::read_index;
use crate::merger::{merge_outputs, MergeReport};
use crate::planner::build_plan;
use crate::storage::write_atomic;
use crate::worker::{ChunkContext, WorkerPool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// Merged, but some chunks failed permanently
    Partial,
    /// Cancelled before every chunk was terminal; nothing was merged
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub chunks_total: usize,
    pub chunks_done: usize,
    pub chunks_failed: usize,
    /// Chunks left pending or in progress by an interrupted run
    pub chunks_unfinished: usize,
    /// Chunks completed by this invocation, as opposed to earlier ones
    pub chunks_processed: usize,
    /// Index entries covered by the plan
    pub records_planned: u64,
    pub records_skipped: u64,
    pub observations: u64,
    pub single_chunk_fallback: bool,
    pub table_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Open the checkpoint store for a run, planning chunks if needed
///
/// A persisted plan is reused as-is unless a chunk count or sample size was
/// requested, in which case the plan is rebuilt and must fingerprint the same.
pub fn prepare(config: &PipelineConfig) -> Result<CheckpointStore> {
    config.validate()?;

    let format = ArchiveFormat::detect(&config.archive_path)?.ok_or_else(|| {
        PipelineError::config(format!(
            "unrecognized archive format: {}",
            config.archive_path.display()
        ))
    })?;
    let len = archive_len(&config.archive_path)?;
    info!(
        archive = %config.archive_path.display(),
        format = %format,
        bytes = len,
        "Detected archive format"
    );

    let checkpoint_path = config.checkpoint_path();
    if config.fresh {
        discard_state(&checkpoint_path)?;
    }

    let existing = load_state(&checkpoint_path, config.checkpoint_policy)?;

    let Some(state) = existing else {
        let requested = config.chunks.unwrap_or(DEFAULT_CHUNK_COUNT);
        let index = read_index(&config.index_path)?;
        let plan = build_plan(
            &config.archive_path,
            format,
            len,
            index.entries,
            requested,
            config.sample,
        )?;
        return CheckpointStore::create(checkpoint_path, plan, config.retry_ceiling);
    };

    if state.plan.format != format || state.plan.archive_len != len {
        return Err(PipelineError::config(format!(
            "archive changed since the checkpoint was planned ({} bytes of {} then, {} bytes of {} now)",
            state.plan.archive_len, state.plan.format, len, format
        )));
    }

    if config.chunks.is_some() || config.sample.is_some() {
        let requested = config.chunks.unwrap_or(state.plan.requested_chunks);
        let index = read_index(&config.index_path)?;
        let plan = build_plan(
            &config.archive_path,
            format,
            len,
            index.entries,
            requested,
            config.sample,
        )?;
        if plan.fingerprint() != state.fingerprint {
            return Err(PipelineError::config(format!(
                "checkpoint plan has {} chunks but the requested plan has {}; rerun with --fresh to start over",
                state.fingerprint.chunk_count,
                plan.fingerprint().chunk_count
            )));
        }
    }

    if state.retry_ceiling != config.retry_ceiling {
        warn!(
            persisted = state.retry_ceiling,
            requested = config.retry_ceiling,
            "Keeping the retry ceiling the checkpoint was created with"
        );
    }

    CheckpointStore::resume(checkpoint_path, state)
}

/// Run the pipeline to completion, interruption or partial completion
pub async fn run(config: &PipelineConfig, cancel: CancellationToken) -> Result<RunReport> {
    let started_at = Utc::now();
    let store = Arc::new(prepare(config)?);
    let plan = store.snapshot().plan;

    let ctx = ChunkContext {
        archive_path: config.archive_path.clone(),
        format: plan.format,
        chunk_dir: config.chunk_dir(),
    };
    let pool = WorkerPool::new(Arc::clone(&store), ctx, config.workers, cancel.clone())
        .with_progress(config.show_progress);
    let pool_summary = pool.run().await?;

    let state = store.snapshot();
    let counts = state.counts();

    let merge = if cancel.is_cancelled() && !counts.all_terminal() {
        warn!(
            unfinished = counts.non_terminal(),
            "Run interrupted; rerun to resume from the checkpoint"
        );
        None
    } else {
        Some(merge_outputs(
            &state,
            &config.chunk_dir(),
            &config.output_path,
            &config.summary_path,
            config.allow_partial,
        )?)
    };

    let status = match &merge {
        None => RunStatus::Interrupted,
        Some(m) if m.complete => RunStatus::Complete,
        Some(_) => RunStatus::Partial,
    };

    let report = build_report(&state, status, pool_summary.completed, merge.as_ref(), started_at);
    write_report(config, &report)?;

    info!(
        run_id = %report.run_id,
        status = %report.status,
        done = report.chunks_done,
        failed = report.chunks_failed,
        planned_records = report.records_planned,
        skipped_records = report.records_skipped,
        processed_this_run = report.chunks_processed,
        "Run finished"
    );
    Ok(report)
}

/// Merge from the persisted checkpoint without processing anything
pub fn merge(config: &PipelineConfig) -> Result<MergeReport> {
    let state = load_state(&config.checkpoint_path(), config.checkpoint_policy)?.ok_or_else(|| {
        PipelineError::config(format!(
            "no checkpoint at {}",
            config.checkpoint_path().display()
        ))
    })?;
    merge_outputs(
        &state,
        &config.chunk_dir(),
        &config.output_path,
        &config.summary_path,
        config.allow_partial,
    )
}

/// Persisted state for status reporting, if any
pub fn status(config: &PipelineConfig) -> Result<Option<CheckpointState>> {
    load_state(&config.checkpoint_path(), config.checkpoint_policy)
}

fn build_report(
    state: &CheckpointState,
    status: RunStatus,
    chunks_processed: usize,
    merge: Option<&MergeReport>,
    started_at: DateTime<Utc>,
) -> RunReport {
    let counts = state.counts();
    let done_stats = state
        .chunks
        .iter()
        .filter(|r| r.status == ChunkStatus::Done)
        .filter_map(|r| r.stats);

    let (records_skipped, observations) =
        done_stats.fold((0, 0), |(skipped, obs), s| (skipped + s.skipped, obs + s.observations));

    RunReport {
        run_id: state.run_id,
        status,
        chunks_total: counts.total(),
        chunks_done: counts.done,
        chunks_failed: counts.failed_final,
        chunks_unfinished: counts.non_terminal(),
        chunks_processed,
        records_planned: state.plan.total_records(),
        records_skipped,
        observations,
        single_chunk_fallback: state.plan.single_chunk_fallback,
        table_path: merge.map(|m| m.table_path.clone()),
        summary_path: merge.map(|m| m.summary_path.clone()),
        started_at,
        finished_at: Utc::now(),
    }
}

fn write_report(config: &PipelineConfig, report: &RunReport) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(report)?;
    bytes.push(b'\n');
    write_atomic(config.report_path(), &bytes)?;
    Ok(())
}
