//! Error taxonomy for the extraction pipeline

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad or mismatched plan, empty index, zero workers or chunks
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Chunk {ordinal} failed: {message}")]
    ChunkProcessing { ordinal: usize, message: String },

    #[error("Checkpoint at {path} is corrupt: {reason}")]
    CheckpointCorruption { path: PathBuf, reason: String },

    #[error("Run is incomplete: {non_terminal} chunk(s) not finished, {failed} permanently failed")]
    IncompleteRun { non_terminal: usize, failed: usize },

    #[error("Chunk {ordinal} cannot move from {from} to {to}")]
    InvalidTransition {
        ordinal: usize,
        from: &'static str,
        to: &'static str,
    },

    #[error("Artifact {path} is unreadable: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("Worker unit stopped unexpectedly: {0}")]
    Worker(String),

    #[error("Unknown chunk ordinal {0}")]
    UnknownChunk(usize),

    #[error(transparent)]
    Common(#[from] benford_common::BenfordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Failure of one chunk attempt, keeping the whole context chain
    pub fn chunk(ordinal: usize, source: &anyhow::Error) -> Self {
        PipelineError::ChunkProcessing {
            ordinal,
            message: format!("{:#}", source),
        }
    }
}

/// Problems with a single record; the record is skipped and counted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("page has no id")]
    MissingId,

    #[error("page id '{0}' is not numeric")]
    InvalidId(String),

    #[error("page {0} has no text")]
    MissingText(u64),
}
