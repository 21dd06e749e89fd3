//! Benford Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunked, resumable extraction of leading-digit statistics from a
//! Wikipedia multistream dump.
//!
//! # Pipeline
//!
//! - **planner**: splits the archive into byte-range chunks along stream boundaries
//! - **checkpoint**: durable per-chunk state machine driving resume
//! - **worker**: pool of units that decode, extract and write chunk artifacts
//! - **merger**: folds artifacts into the final table and summary
//! - **pipeline**: ties the steps together for one run
//!
//! # Example
//!
//! ```no_run
//! use benford_ingest::config::PipelineConfig;
//! use benford_ingest::pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let report = pipeline::run(&config, CancellationToken::new()).await?;
//!     println!("{}: {} chunks done", report.status, report.chunks_done);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod artifact;
pub mod categorizer;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
pub mod merger;
pub mod pipeline;
pub mod planner;
pub mod records;
pub mod storage;
pub mod wikitext;
pub mod worker;

pub use error::{PipelineError, RecordError, Result};
