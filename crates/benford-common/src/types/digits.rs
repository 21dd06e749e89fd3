use super::Category;
use crate::error::{BenfordError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Leading-digit frequencies for one category
///
/// `pairs[f - 1][s]` counts numbers with first digit `f` and second digit
/// `s`; `single[f - 1]` counts numbers whose integer part is one digit long.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitTable {
    pub pairs: [[u64; 10]; 9],
    pub single: [u64; 9],
}

impl DigitTable {
    pub fn record(&mut self, first: u8, second: Option<u8>) -> Result<()> {
        if !(1..=9).contains(&first) {
            return Err(BenfordError::InvalidDigit {
                digit: first,
                position: "first",
            });
        }
        let row = usize::from(first - 1);
        match second {
            Some(s) if s > 9 => Err(BenfordError::InvalidDigit {
                digit: s,
                position: "second",
            }),
            Some(s) => {
                self.pairs[row][usize::from(s)] += 1;
                Ok(())
            },
            None => {
                self.single[row] += 1;
                Ok(())
            },
        }
    }

    /// Element-wise sum
    pub fn merge(&mut self, other: &DigitTable) {
        for (row, other_row) in self.pairs.iter_mut().zip(other.pairs.iter()) {
            for (cell, other_cell) in row.iter_mut().zip(other_row.iter()) {
                *cell += other_cell;
            }
        }
        for (cell, other_cell) in self.single.iter_mut().zip(other.single.iter()) {
            *cell += other_cell;
        }
    }

    /// Counts indexed by first digit minus one
    pub fn first_digit_counts(&self) -> [u64; 9] {
        let mut counts = self.single;
        for (count, row) in counts.iter_mut().zip(self.pairs.iter()) {
            *count += row.iter().sum::<u64>();
        }
        counts
    }

    pub fn total(&self) -> u64 {
        self.first_digit_counts().iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Per-category digit tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigitSummary(BTreeMap<Category, DigitTable>);

impl DigitSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: Category, first: u8, second: Option<u8>) -> Result<()> {
        self.0.entry(category).or_default().record(first, second)
    }

    pub fn merge(&mut self, other: &DigitSummary) {
        for (category, table) in &other.0 {
            self.0.entry(*category).or_default().merge(table);
        }
    }

    pub fn get(&self, category: Category) -> Option<&DigitTable> {
        self.0.get(&category)
    }

    /// Categories in priority order
    pub fn iter(&self) -> impl Iterator<Item = (Category, &DigitTable)> {
        self.0.iter().map(|(c, t)| (*c, t))
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(DigitTable::total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
