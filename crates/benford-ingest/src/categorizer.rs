//! Type marker to category mapping
//!
//! Keywords match whole words, case-insensitively. Multi-word keywords must
//! appear as a contiguous word sequence. Categories are tried in table order
//! and the first hit wins.

use benford_common::Category;

pub static CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Geography,
        &[
            "settlement",
            "country",
            "city",
            "region",
            "body of water",
            "mountain",
            "island",
            "river",
            "lake",
            "sea",
            "ocean",
            "valley",
            "desert",
            "forest",
            "park",
            "protected area",
            "place",
            "location",
            "administrative division",
            "municipality",
            "province",
            "state",
            "territory",
            "continent",
        ],
    ),
    (
        Category::People,
        &[
            "person",
            "officeholder",
            "scientist",
            "artist",
            "writer",
            "musician",
            "athlete",
            "actor",
            "politician",
            "military person",
            "biography",
            "sportsperson",
            "footballer",
            "football biography",
            "basketball biography",
            "baseball biography",
            "ice hockey player",
            "cricketer",
            "tennis biography",
            "royalty",
            "noble",
            "philosopher",
            "economist",
            "engineer",
        ],
    ),
    (
        Category::Science,
        &[
            "element",
            "planet",
            "star",
            "chemical compound",
            "mineral",
            "disease",
            "drug",
            "medication",
            "medical condition",
            "anatomy",
            "constellation",
            "galaxy",
            "nebula",
            "astronomical object",
            "particle",
            "molecule",
            "isotope",
            "ion",
        ],
    ),
    (
        Category::Sports,
        &[
            "sports team",
            "stadium",
            "tournament",
            "football club",
            "basketball team",
            "baseball team",
            "ice hockey team",
            "sports season",
            "sports league",
            "racing driver",
            "cyclist",
            "olympian",
            "sports competition",
            "football club season",
        ],
    ),
    (
        Category::Business,
        &[
            "company",
            "organization",
            "university",
            "college",
            "school",
            "corporation",
            "airline",
            "bank",
            "brand",
            "product",
            "software",
            "website",
            "nonprofit",
            "ngo",
        ],
    ),
    (
        Category::Media,
        &[
            "film",
            "television",
            "album",
            "single",
            "song",
            "video game",
            "book",
            "magazine",
            "newspaper",
            "tv channel",
            "radio station",
            "musical artist",
            "band",
            "podcast",
            "television episode",
            "television season",
            "anime",
            "manga",
        ],
    ),
    (
        Category::Military,
        &[
            "military conflict",
            "weapon",
            "aircraft",
            "ship",
            "military unit",
            "battle",
            "war",
            "military structure",
            "military vehicle",
            "submarine",
            "warship",
            "tank",
            "gun",
            "missile",
            "military operation",
        ],
    ),
    (
        Category::Biology,
        &[
            "taxobox",
            "speciesbox",
            "automatic taxobox",
            "subspeciesbox",
            "virus",
            "bacteria",
            "fungus",
            "plant",
            "animal",
            "insect",
            "bird",
            "fish",
            "mammal",
            "reptile",
            "amphibian",
        ],
    ),
    (
        Category::Infrastructure,
        &[
            "bridge",
            "building",
            "station",
            "airport",
            "road",
            "highway",
            "railway",
            "tunnel",
            "dam",
            "power station",
            "lighthouse",
            "skyscraper",
            "tower",
            "shopping mall",
            "hotel",
        ],
    ),
    (
        Category::Events,
        &[
            "election",
            "event",
            "disaster",
            "earthquake",
            "hurricane",
            "tornado",
            "flood",
            "fire",
            "accident",
            "festival",
            "ceremony",
            "conference",
            "summit",
        ],
    ),
];

/// Map a type marker to its category; absent or unknown markers are
/// `Uncategorized`
pub fn categorize(type_marker: Option<&str>) -> Category {
    let Some(marker) = type_marker else {
        return Category::Uncategorized;
    };

    let words = words(marker);
    if words.is_empty() {
        return Category::Uncategorized;
    }

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| contains_phrase(&words, kw)))
        .map_or(Category::Uncategorized, |(category, _)| *category)
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], keyword: &str) -> bool {
    let phrase: Vec<&str> = keyword.split_whitespace().collect();
    if phrase.is_empty() || phrase.len() > words.len() {
        return false;
    }
    words
        .windows(phrase.len())
        .any(|window| window.iter().zip(&phrase).all(|(w, p)| w.eq_ignore_ascii_case(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_and_empty_markers() {
        assert_eq!(categorize(None), Category::Uncategorized);
        assert_eq!(categorize(Some("")), Category::Uncategorized);
        assert_eq!(categorize(Some("  -- ")), Category::Uncategorized);
        assert_eq!(categorize(Some("zeppelin")), Category::Uncategorized);
    }

    #[test]
    fn test_basic_mapping() {
        assert_eq!(categorize(Some("country")), Category::Geography);
        assert_eq!(categorize(Some("footballer")), Category::People);
        assert_eq!(categorize(Some("Chemical Compound")), Category::Science);
        assert_eq!(categorize(Some("football club")), Category::Sports);
        assert_eq!(categorize(Some("company")), Category::Business);
        assert_eq!(categorize(Some("film")), Category::Media);
        assert_eq!(categorize(Some("military conflict")), Category::Military);
        assert_eq!(categorize(Some("speciesbox")), Category::Biology);
        assert_eq!(categorize(Some("bridge")), Category::Infrastructure);
        assert_eq!(categorize(Some("election")), Category::Events);
    }

    #[test]
    fn test_whole_words_only() {
        // "element" must not match inside "elementary", "ion" not inside "election"
        assert_eq!(categorize(Some("elementary school")), Category::Business);
        assert_eq!(categorize(Some("election")), Category::Events);
        assert_eq!(categorize(Some("seaplane")), Category::Uncategorized);
    }

    #[test]
    fn test_multi_word_keywords_need_contiguous_words() {
        assert_eq!(categorize(Some("power station")), Category::Infrastructure);
        assert_eq!(categorize(Some("body of water")), Category::Geography);
        assert_eq!(categorize(Some("water body")), Category::Uncategorized);
    }

    #[test]
    fn test_table_order_breaks_ties() {
        // "military person" hits People before Military is consulted
        assert_eq!(categorize(Some("military person")), Category::People);
        // "musical artist" contains the People keyword "artist"
        assert_eq!(categorize(Some("musical artist")), Category::People);
    }

    #[test]
    fn test_deterministic() {
        for marker in ["river", "tv channel", "NGO", "unknown thing"] {
            assert_eq!(categorize(Some(marker)), categorize(Some(marker)));
        }
        assert_eq!(categorize(Some("ngo")), categorize(Some("NGO")));
    }
}
