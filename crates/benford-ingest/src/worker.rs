//! Worker pool
//!
//! A fixed number of units run on tokio's blocking pool. Each unit claims a
//! chunk from the checkpoint store, streams its byte range through the page
//! decoder and the two-pass extractor, writes the chunk artifact and records
//! the outcome. Units share nothing but the store.

use crate::archive::{open_range, ArchiveFormat};
use crate::artifact::ArtifactWriter;
use crate::categorizer::categorize;
use crate::checkpoint::{CheckpointStore, ChunkStats, ChunkStatus, Transition};
use crate::error::{PipelineError, Result};
use crate::extractor::{extract_numbers, quick_has_numbers};
use crate::planner::Chunk;
use crate::records::{PageOutcome, PageReader, Record};
use crate::wikitext::{strip_markup, type_marker};
use anyhow::Context;
use benford_common::{DigitSummary, NumberObservation};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

/// What every unit needs to process any chunk of one archive
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub archive_path: PathBuf,
    pub format: ArchiveFormat,
    pub chunk_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed {
        stats: ChunkStats,
        artifact_sha256: String,
    },
    /// Abandoned between records; the chunk stays in progress
    Cancelled,
}

/// Pass 2 over one article: strip markup, categorize, scan for numbers
pub fn record_observations(record: &Record) -> Vec<NumberObservation> {
    let category = categorize(type_marker(&record.body).as_deref());
    let text = strip_markup(&record.body);
    extract_numbers(&text)
        .map(|token| NumberObservation {
            record_id: record.id,
            category,
            number: token.text.to_string(),
            first_digit: token.first_digit,
            second_digit: token.second_digit,
        })
        .collect()
}

/// Process one chunk end to end
///
/// Malformed pages are skipped and counted. Decode and write failures abort
/// the chunk with the full context chain.
pub fn process_chunk(
    ctx: &ChunkContext,
    chunk: &Chunk,
    cancel: &CancellationToken,
) -> anyhow::Result<ChunkOutcome> {
    let stream = open_range(&ctx.archive_path, ctx.format, chunk.start_offset, chunk.end_offset)
        .with_context(|| {
            format!(
                "Failed to open byte range {}..{} of {}",
                chunk.start_offset,
                chunk.end_offset,
                ctx.archive_path.display()
            )
        })?;
    let mut pages = PageReader::new(stream);
    let mut writer = ArtifactWriter::create(&ctx.chunk_dir, chunk.ordinal)
        .context("Failed to create chunk artifact")?;

    let mut stats = ChunkStats::default();
    let mut digits = DigitSummary::new();

    loop {
        if cancel.is_cancelled() {
            return Ok(ChunkOutcome::Cancelled);
        }

        let outcome = pages
            .next_page()
            .with_context(|| format!("Failed to decode page after {} records", stats.records_seen))?;
        let Some(outcome) = outcome else {
            break;
        };
        stats.records_seen += 1;

        match outcome {
            PageOutcome::NonArticle => {},
            PageOutcome::Malformed(e) => {
                stats.skipped += 1;
                debug!(ordinal = chunk.ordinal, error = %e, "Skipping malformed record");
            },
            PageOutcome::Article(record) => {
                stats.articles += 1;
                if !quick_has_numbers(record.body.as_bytes()) {
                    stats.prefiltered += 1;
                    continue;
                }
                for observation in record_observations(&record) {
                    digits.record(
                        observation.category,
                        observation.first_digit,
                        observation.second_digit,
                    )?;
                    writer.write(&observation)?;
                }
            },
        }
    }

    stats.observations = writer.written();
    let artifact_sha256 = writer
        .finish(stats, digits)
        .context("Failed to finish chunk artifact")?;

    Ok(ChunkOutcome::Completed {
        stats,
        artifact_sha256,
    })
}

/// Per-run tallies across all units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub completed: usize,
    pub failed_attempts: usize,
    pub abandoned: usize,
    pub stats: ChunkStats,
}

impl PoolSummary {
    fn merge(&mut self, other: &PoolSummary) {
        self.completed += other.completed;
        self.failed_attempts += other.failed_attempts;
        self.abandoned += other.abandoned;
        self.stats.merge(&other.stats);
    }
}

pub struct WorkerPool {
    store: Arc<CheckpointStore>,
    ctx: Arc<ChunkContext>,
    workers: usize,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<CheckpointStore>,
        ctx: ChunkContext,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            ctx: Arc::new(ctx),
            workers: workers.max(1),
            cancel: cancel.child_token(),
            progress: None,
        }
    }

    /// Show a progress bar advancing once per finished chunk
    pub fn with_progress(mut self, show: bool) -> Self {
        self.progress = show.then(|| {
            let counts = self.store.counts();
            let pb = ProgressBar::new(counts.total() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_position((counts.done + counts.failed_final) as u64);
            pb
        });
        self
    }

    /// Run until no chunk is claimable or the token is cancelled
    pub async fn run(self) -> Result<PoolSummary> {
        info!(workers = self.workers, "Starting worker pool");

        let mut units = JoinSet::new();
        for unit in 0..self.workers {
            let store = Arc::clone(&self.store);
            let ctx = Arc::clone(&self.ctx);
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            units.spawn_blocking(move || {
                let outcome = run_unit(unit, &store, &ctx, &cancel, progress.as_ref());
                (unit, outcome)
            });
        }

        let mut summary = PoolSummary::default();
        let mut first_error = None;
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((_, Ok(unit_summary))) => summary.merge(&unit_summary),
                Ok((unit, Err(e))) => {
                    error!(unit, error = %e, "Worker unit stopped");
                    // Remaining units cannot make progress without the store
                    self.cancel.cancel();
                    first_error.get_or_insert(e);
                },
                Err(e) => {
                    error!(error = %e, "Worker unit panicked");
                    self.cancel.cancel();
                    first_error.get_or_insert(PipelineError::Worker(e.to_string()));
                },
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_with_message("done");
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    completed = summary.completed,
                    failed_attempts = summary.failed_attempts,
                    abandoned = summary.abandoned,
                    observations = summary.stats.observations,
                    "Worker pool drained"
                );
                Ok(summary)
            },
        }
    }
}

fn run_unit(
    unit: usize,
    store: &CheckpointStore,
    ctx: &ChunkContext,
    cancel: &CancellationToken,
    progress: Option<&ProgressBar>,
) -> Result<PoolSummary> {
    let mut summary = PoolSummary::default();

    while !cancel.is_cancelled() {
        let Some(chunk) = store.claim()? else {
            break;
        };
        let span = info_span!("chunk", ordinal = chunk.ordinal, unit);
        let _guard = span.enter();
        let started = Instant::now();
        debug!(start = chunk.start_offset, end = chunk.end_offset, "Claimed chunk");

        match process_chunk(ctx, &chunk, cancel) {
            Ok(ChunkOutcome::Completed {
                stats,
                artifact_sha256,
            }) => {
                store.record(
                    chunk.ordinal,
                    Transition::Done {
                        stats,
                        artifact_sha256,
                    },
                )?;
                info!(
                    articles = stats.articles,
                    skipped = stats.skipped,
                    observations = stats.observations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Chunk done"
                );
                summary.completed += 1;
                summary.stats.merge(&stats);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
            },
            Ok(ChunkOutcome::Cancelled) => {
                warn!("Chunk abandoned on cancellation");
                summary.abandoned += 1;
                break;
            },
            Err(e) => {
                let failure = PipelineError::chunk(chunk.ordinal, &e);
                let status = store.record(
                    chunk.ordinal,
                    Transition::Failed {
                        error: failure.to_string(),
                    },
                )?;
                summary.failed_attempts += 1;
                if status == ChunkStatus::FailedFinal {
                    error!(error = %failure, "Chunk failed permanently");
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                } else {
                    warn!(error = %failure, "Chunk failed, will retry");
                }
            },
        }
    }

    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::artifact::{artifact_path, read_artifact};
    use benford_common::Category;
    use std::io::Write;

    fn page(id: u64, ns: u32, text: &str) -> String {
        format!(
            "<page><title>P{id}</title><ns>{ns}</ns><id>{id}</id><revision><id>9{id}</id><text>{text}</text></revision></page>\n"
        )
    }

    fn xml_context(dir: &std::path::Path, xml: &str) -> (ChunkContext, Chunk) {
        let archive = dir.join("dump.xml");
        std::fs::File::create(&archive)
            .unwrap()
            .write_all(xml.as_bytes())
            .unwrap();
        let ctx = ChunkContext {
            archive_path: archive,
            format: ArchiveFormat::Xml,
            chunk_dir: dir.join("chunks"),
        };
        let chunk = Chunk {
            ordinal: 0,
            start_offset: 0,
            end_offset: xml.len() as u64,
            record_hint: 0,
        };
        (ctx, chunk)
    }

    #[test]
    fn test_record_observations_categorizes_and_extracts() {
        let record = Record {
            id: 2,
            title: "Someone".to_string(),
            body: "{{Infobox footballer|name=X}}Born 1985, scored 23 goals".to_string(),
        };
        let observations = record_observations(&record);
        let numbers: Vec<_> = observations.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, vec!["1985", "23"]);
        assert!(observations.iter().all(|o| o.category == Category::People));
        assert_eq!(observations[0].second_digit, Some(9));
    }

    #[test]
    fn test_process_chunk_counts_every_kind_of_page() {
        let dir = tempfile::tempdir().unwrap();
        let xml = [
            page(1, 0, "Population: 83190556"),
            page(2, 1, "Talk page 1234"),
            page(3, 0, "no digits here"),
            "<page><title>Broken</title><ns>0</ns><id>abc</id><revision><text>77</text></revision></page>\n".to_string(),
            page(5, 0, "Scores of 42 and 7"),
        ]
        .concat();
        let (ctx, chunk) = xml_context(dir.path(), &xml);

        let outcome = process_chunk(&ctx, &chunk, &CancellationToken::new()).unwrap();
        let ChunkOutcome::Completed { stats, artifact_sha256 } = outcome else {
            panic!("chunk was not completed");
        };
        assert_eq!(stats.records_seen, 5);
        assert_eq!(stats.articles, 3);
        assert_eq!(stats.prefiltered, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.observations, 3);

        let path = artifact_path(&ctx.chunk_dir, 0);
        assert_eq!(
            artifact_sha256,
            benford_common::checksum::compute_file_checksum(&path).unwrap()
        );
        let (observations, trailer) = read_artifact(&path).unwrap();
        let ids: Vec<_> = observations.iter().map(|o| (o.record_id, o.number.as_str())).collect();
        assert_eq!(ids, vec![(1, "83190556"), (5, "42"), (5, "7")]);
        assert_eq!(trailer.stats, stats);
    }

    #[test]
    fn test_cancelled_chunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, chunk) = xml_context(dir.path(), &page(1, 0, "42"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = process_chunk(&ctx, &chunk, &cancel).unwrap();
        assert_eq!(outcome, ChunkOutcome::Cancelled);
        assert!(!artifact_path(&ctx.chunk_dir, 0).exists());
    }

    #[test]
    fn test_truncated_stream_fails_the_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, chunk) = xml_context(dir.path(), "<page><title>Cut</title><ns>0</ns><id>1</id><text>12");

        let err = process_chunk(&ctx, &chunk, &CancellationToken::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to decode page"));
    }

    #[tokio::test]
    async fn test_pool_records_typed_chunk_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, chunk) = xml_context(dir.path(), "<page><title>Cut</title><ns>0</ns><id>1</id><text>12");
        let plan = crate::planner::ChunkPlan {
            format: ArchiveFormat::Xml,
            archive_len: chunk.end_offset,
            requested_chunks: 1,
            sample: None,
            single_chunk_fallback: false,
            chunks: vec![chunk],
        };
        let store = Arc::new(
            CheckpointStore::create(dir.path().join("checkpoint.json"), plan, 2).unwrap(),
        );

        let summary = WorkerPool::new(Arc::clone(&store), ctx, 1, CancellationToken::new())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed_attempts, 2);

        let record = &store.snapshot().chunks[0];
        assert_eq!(record.status, ChunkStatus::FailedFinal);
        let last_error = record.last_error.as_deref().unwrap();
        assert!(last_error.starts_with("Chunk 0 failed: "));
        assert!(last_error.contains("Failed to decode page"));
    }
}
