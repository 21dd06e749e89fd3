use crate::error::BenfordError;
use serde::{Deserialize, Serialize};

/// Coarse topical label assigned to a record
///
/// Variant order is the categorizer's priority order; `Uncategorized` is the
/// fallback and always sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Geography,
    People,
    Science,
    Sports,
    Business,
    Media,
    Military,
    Biology,
    Infrastructure,
    Events,
    Uncategorized,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Geography,
        Category::People,
        Category::Science,
        Category::Sports,
        Category::Business,
        Category::Media,
        Category::Military,
        Category::Biology,
        Category::Infrastructure,
        Category::Events,
        Category::Uncategorized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Geography => "Geography",
            Category::People => "People",
            Category::Science => "Science",
            Category::Sports => "Sports",
            Category::Business => "Business",
            Category::Media => "Media",
            Category::Military => "Military",
            Category::Biology => "Biology",
            Category::Infrastructure => "Infrastructure",
            Category::Events => "Events",
            Category::Uncategorized => "Uncategorized",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = BenfordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BenfordError::UnknownCategory(s.to_string()))
    }
}
