//! Per-chunk result artifacts
//!
//! `chunk_<ordinal:06>.jsonl.gz` holds one JSON observation per line, in
//! extraction order, followed by a trailer line with the chunk's counters and
//! digit tables. Observations are streamed to disk as they are found, which
//! is why the aggregate trails instead of leading.

use crate::checkpoint::ChunkStats;
use crate::error::{PipelineError, Result};
use crate::storage::AtomicFile;
use benford_common::checksum::compute_file_checksum;
use benford_common::{DigitSummary, NumberObservation};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

pub fn artifact_path(chunk_dir: &Path, ordinal: usize) -> PathBuf {
    chunk_dir.join(format!("chunk_{:06}.jsonl.gz", ordinal))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTrailer {
    pub format_version: u32,
    pub ordinal: usize,
    pub stats: ChunkStats,
    pub digits: DigitSummary,
}

/// Streams observations into a temporary file that replaces the artifact on
/// `finish`, so a retried chunk overwrites any earlier attempt cleanly
pub struct ArtifactWriter {
    path: PathBuf,
    ordinal: usize,
    encoder: GzEncoder<BufWriter<AtomicFile>>,
    written: u64,
}

impl ArtifactWriter {
    pub fn create(chunk_dir: &Path, ordinal: usize) -> Result<Self> {
        let path = artifact_path(chunk_dir, ordinal);
        let file = AtomicFile::create(&path)?;
        Ok(Self {
            path,
            ordinal,
            encoder: GzEncoder::new(BufWriter::with_capacity(256 * 1024, file), Compression::fast()),
            written: 0,
        })
    }

    pub fn write(&mut self, observation: &NumberObservation) -> Result<()> {
        serde_json::to_writer(&mut self.encoder, observation)?;
        self.encoder.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write the trailer, publish the file and return its SHA-256
    pub fn finish(mut self, stats: ChunkStats, digits: DigitSummary) -> Result<String> {
        let trailer = ArtifactTrailer {
            format_version: ARTIFACT_FORMAT_VERSION,
            ordinal: self.ordinal,
            stats,
            digits,
        };
        serde_json::to_writer(&mut self.encoder, &trailer)?;
        self.encoder.write_all(b"\n")?;

        let buffered = self.encoder.finish()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.commit()?;

        Ok(compute_file_checksum(&self.path)?)
    }
}

/// Streams observations back out of an artifact
pub struct ArtifactReader {
    path: PathBuf,
    lines: Lines<BufReader<MultiGzDecoder<File>>>,
    lookahead: Option<String>,
    read: u64,
}

impl ArtifactReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let mut lines = BufReader::with_capacity(256 * 1024, MultiGzDecoder::new(file)).lines();
        let lookahead = lines.next().transpose()?;
        Ok(Self {
            path,
            lines,
            lookahead,
            read: 0,
        })
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::CorruptArtifact {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Next observation; `None` once only the trailer remains
    pub fn next_observation(&mut self) -> Result<Option<NumberObservation>> {
        let Some(current) = self.lookahead.take() else {
            return Ok(None);
        };
        match self.lines.next().transpose()? {
            Some(next) => {
                self.lookahead = Some(next);
                let observation = serde_json::from_str(&current).map_err(|e| self.corrupt(e))?;
                self.read += 1;
                Ok(Some(observation))
            },
            None => {
                // `current` is the final line
                self.lookahead = Some(current);
                Ok(None)
            },
        }
    }

    /// Consume the trailer after all observations were read
    pub fn into_trailer(mut self) -> Result<ArtifactTrailer> {
        while self.next_observation()?.is_some() {}
        let line = self
            .lookahead
            .take()
            .ok_or_else(|| self.corrupt("missing trailer"))?;
        let trailer: ArtifactTrailer = serde_json::from_str(&line).map_err(|e| self.corrupt(e))?;

        if trailer.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(self.corrupt(format!("unsupported format version {}", trailer.format_version)));
        }
        if trailer.stats.observations != self.read {
            return Err(self.corrupt(format!(
                "trailer lists {} observations but {} were read",
                trailer.stats.observations, self.read
            )));
        }
        Ok(trailer)
    }
}

/// Read a whole artifact into memory
pub fn read_artifact(path: &Path) -> Result<(Vec<NumberObservation>, ArtifactTrailer)> {
    let mut reader = ArtifactReader::open(path)?;
    let mut observations = Vec::new();
    while let Some(observation) = reader.next_observation()? {
        observations.push(observation);
    }
    Ok((observations, reader.into_trailer()?))
}
