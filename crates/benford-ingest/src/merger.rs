//! Final table and summary
//!
//! Runs once every chunk is terminal. Artifacts of `done` chunks are verified
//! against their recorded SHA-256 and streamed into the table in ordinal
//! order. Their trailers are folded into one digit summary. Neither output
//! carries timestamps, so merging the same state twice is byte-identical.

use crate::artifact::{artifact_path, ArtifactReader};
use crate::checkpoint::{CheckpointState, ChunkStatus};
use crate::error::{PipelineError, Result};
use crate::storage::{write_atomic, AtomicFile};
use benford_common::checksum::verify_file_checksum;
use benford_common::{Category, DigitSummary, NumberObservation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TABLE_HEADER: [&str; 5] = ["record_id", "category", "number", "first_digit", "second_digit"];

/// Key used for numbers whose integer part has a single digit
pub const SINGLE_DIGIT_KEY: &str = "none";

#[derive(Debug, Serialize)]
struct TableRow<'a> {
    record_id: u64,
    category: &'static str,
    number: &'a str,
    first_digit: u8,
    second_digit: Option<u8>,
}

impl<'a> From<&'a NumberObservation> for TableRow<'a> {
    fn from(o: &'a NumberObservation) -> Self {
        Self {
            record_id: o.record_id,
            category: o.category.as_str(),
            number: &o.number,
            first_digit: o.first_digit,
            second_digit: o.second_digit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub complete: bool,
    pub chunks_total: usize,
    pub chunks_merged: usize,
    pub missing_chunks: Vec<usize>,
    pub observations: u64,
    /// category -> first digit -> count
    pub first_digit: BTreeMap<Category, BTreeMap<u8, u64>>,
    /// category -> first digit -> second digit (or `none`) -> count
    pub first_second_digit: BTreeMap<Category, BTreeMap<u8, BTreeMap<String, u64>>>,
}

impl SummaryDocument {
    fn from_digits(digits: &DigitSummary) -> Self {
        let mut first_digit = BTreeMap::new();
        let mut first_second_digit = BTreeMap::new();

        for (category, table) in digits.iter() {
            if table.is_empty() {
                continue;
            }

            let firsts: BTreeMap<u8, u64> = (1u8..)
                .zip(table.first_digit_counts())
                .filter(|(_, count)| *count > 0)
                .collect();
            first_digit.insert(category, firsts);

            let mut pairs = BTreeMap::new();
            for (first, (row, single)) in (1u8..).zip(table.pairs.iter().zip(table.single.iter())) {
                let mut seconds: BTreeMap<String, u64> = (0u8..)
                    .zip(row.iter().copied())
                    .filter(|(_, count)| *count > 0)
                    .map(|(second, count)| (second.to_string(), count))
                    .collect();
                if *single > 0 {
                    seconds.insert(SINGLE_DIGIT_KEY.to_string(), *single);
                }
                if !seconds.is_empty() {
                    pairs.insert(first, seconds);
                }
            }
            first_second_digit.insert(category, pairs);
        }

        Self {
            complete: true,
            chunks_total: 0,
            chunks_merged: 0,
            missing_chunks: Vec::new(),
            observations: digits.total(),
            first_digit,
            first_second_digit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub table_path: PathBuf,
    pub summary_path: PathBuf,
    pub complete: bool,
    pub chunks_merged: usize,
    pub missing_chunks: Vec<usize>,
    pub observations: u64,
}

/// `numbers.csv` -> `numbers.partial.csv`
pub fn partial_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    path.with_file_name(name)
}

/// Write the final table and summary for a terminal run
///
/// Permanently failed chunks are only tolerated with `allow_partial`, in
/// which case both outputs get `.partial` names.
pub fn merge_outputs(
    state: &CheckpointState,
    chunk_dir: &Path,
    table_path: &Path,
    summary_path: &Path,
    allow_partial: bool,
) -> Result<MergeReport> {
    let counts = state.counts();
    if !counts.all_terminal() {
        return Err(PipelineError::IncompleteRun {
            non_terminal: counts.non_terminal(),
            failed: counts.failed_final,
        });
    }

    let missing_chunks: Vec<usize> = state
        .chunks
        .iter()
        .filter(|r| r.status == ChunkStatus::FailedFinal)
        .map(|r| r.chunk.ordinal)
        .collect();
    if !missing_chunks.is_empty() && !allow_partial {
        return Err(PipelineError::IncompleteRun {
            non_terminal: 0,
            failed: missing_chunks.len(),
        });
    }

    let complete = missing_chunks.is_empty();
    let (table_path, summary_path) = if complete {
        (table_path.to_path_buf(), summary_path.to_path_buf())
    } else {
        warn!(missing = ?missing_chunks, "Merging a partial run");
        (partial_path(table_path), partial_path(summary_path))
    };

    let mut table = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(AtomicFile::create(&table_path)?);
    table.write_record(TABLE_HEADER)?;

    let mut digits = DigitSummary::new();
    let mut observations = 0u64;
    let mut chunks_merged = 0usize;

    for record in state.chunks.iter().filter(|r| r.status == ChunkStatus::Done) {
        let ordinal = record.chunk.ordinal;
        let path = artifact_path(chunk_dir, ordinal);
        let expected = record
            .artifact_sha256
            .as_deref()
            .ok_or_else(|| PipelineError::CorruptArtifact {
                path: path.clone(),
                reason: "no checksum recorded for a done chunk".to_string(),
            })?;
        verify_file_checksum(&path, expected)?;

        let mut reader = ArtifactReader::open(&path)?;
        while let Some(observation) = reader.next_observation()? {
            table.serialize(TableRow::from(&observation))?;
        }
        let trailer = reader.into_trailer()?;
        if trailer.ordinal != ordinal {
            return Err(PipelineError::CorruptArtifact {
                path,
                reason: format!("trailer belongs to chunk {}", trailer.ordinal),
            });
        }

        observations += trailer.stats.observations;
        digits.merge(&trailer.digits);
        chunks_merged += 1;
        debug!(ordinal, observations = trailer.stats.observations, "Merged chunk");
    }

    let file = table
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    file.commit()?;

    let summary = SummaryDocument {
        complete,
        chunks_total: state.chunks.len(),
        chunks_merged,
        missing_chunks: missing_chunks.clone(),
        observations,
        ..SummaryDocument::from_digits(&digits)
    };
    let mut bytes = serde_json::to_vec_pretty(&summary)?;
    bytes.push(b'\n');
    write_atomic(&summary_path, &bytes)?;

    info!(
        table = %table_path.display(),
        summary = %summary_path.display(),
        chunks_merged,
        observations,
        complete,
        "Merged chunk artifacts"
    );

    Ok(MergeReport {
        table_path,
        summary_path,
        complete,
        chunks_merged,
        missing_chunks,
        observations,
    })
}

pub fn read_summary(path: &Path) -> Result<SummaryDocument> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
