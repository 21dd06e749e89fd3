//! Benford Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Benford workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BenfordError`] and the crate-wide [`Result`] alias
//! - **Checksums**: SHA-256 digests for artifacts and plan fingerprints
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: categories, number observations and digit frequency tables
//!
//! # Example
//!
//! ```no_run
//! use benford_common::checksum::compute_file_checksum;
//! use benford_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     compute_file_checksum(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BenfordError, Result};
pub use types::{Category, DigitSummary, DigitTable, NumberObservation};
