//! Error types shared across the Benford workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, BenfordError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum BenfordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid digit {digit} for {position} position")]
    InvalidDigit { digit: u8, position: &'static str },
}
