//! Common types used across the Benford workspace

mod category;
mod digits;

pub use category::Category;
pub use digits::{DigitSummary, DigitTable};

use serde::{Deserialize, Serialize};

/// One number found in one record
///
/// `number` keeps the decimal text exactly as it appeared, including any
/// fractional part. The digits are taken from the integer part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberObservation {
    pub record_id: u64,
    pub category: Category,
    pub number: String,
    pub first_digit: u8,
    pub second_digit: Option<u8>,
}
