//! Wiki markup handling
//!
//! Stripping only removes text or keeps existing substrings, it never
//! produces characters that were not already in the body. The extractor's
//! byte prefilter relies on that.

use regex::Regex;
use std::sync::OnceLock;

static RE_INFOBOX: OnceLock<Regex> = OnceLock::new();
static RE_TAXOBOX: OnceLock<Regex> = OnceLock::new();
static RE_REF_SELF_CLOSING: OnceLock<Regex> = OnceLock::new();
static RE_REF_BLOCK: OnceLock<Regex> = OnceLock::new();
static RE_EXTERNAL_LINK: OnceLock<Regex> = OnceLock::new();
static RE_TAG: OnceLock<Regex> = OnceLock::new();
static RE_HEADING: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => re,
        // Patterns are literals covered by the tests below
        Err(e) => panic!("invalid built-in pattern {pattern}: {e}"),
    })
}

/// Declared type of the record, taken from its first infobox
///
/// `{{Infobox football biography | ...}}` yields `"football biography"`.
/// Standalone taxonomy boxes are their own marker.
pub fn type_marker(body: &str) -> Option<String> {
    let infobox = regex(&RE_INFOBOX, r"(?i)\{\{\s*infobox(?:[ _]+([^|}<\n]*))?");
    for caps in infobox.captures_iter(body) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        let name = normalize_name(name);
        if !name.is_empty() {
            return Some(name);
        }
    }

    let taxobox = regex(
        &RE_TAXOBOX,
        r"(?i)\{\{\s*(automatic[ _]+taxobox|taxobox|speciesbox|subspeciesbox)\s*[|}\n]",
    );
    taxobox
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_name(m.as_str()))
}

fn normalize_name(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Reduce markup to readable text
pub fn strip_markup(body: &str) -> String {
    let text = remove_comments(body);
    let text = remove_references(&text);
    let text = remove_nested(&text, ('{', '{'), ('}', '}'));
    let text = remove_nested(&text, ('{', '|'), ('|', '}'));
    let text = replace_links(&text);
    let text = regex(&RE_EXTERNAL_LINK, r"\[(?:https?:)?//[^\s\]]*\s*([^\]]*)\]")
        .replace_all(&text, "$1");
    let text = regex(&RE_TAG, r"</?[A-Za-z][^<>]*>").replace_all(&text, "");
    let text = text.replace("'''", "").replace("''", "");
    let text = regex(&RE_HEADING, r"(?m)^[ \t]*=+[ \t]*(.*?)[ \t]*=+[ \t]*$")
        .replace_all(&text, "$1");
    decode_entities(&text)
}

fn remove_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            // Unterminated comment hides the rest of the page
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

fn remove_references(text: &str) -> String {
    let text = regex(&RE_REF_SELF_CLOSING, r"(?i)<ref\b[^>]*/>").replace_all(text, "");
    regex(&RE_REF_BLOCK, r"(?is)<ref\b[^>]*>.*?</ref\s*>")
        .replace_all(&text, "")
        .into_owned()
}

/// Drop balanced two-character delimited spans such as `{{ }}` and `{| |}`
fn remove_nested(text: &str, open: (char, char), close: (char, char)) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == open.0 && chars.peek() == Some(&open.1) {
            chars.next();
            depth += 1;
        } else if depth > 0 && c == close.0 && chars.peek() == Some(&close.1) {
            chars.next();
            depth -= 1;
        } else if depth == 0 {
            out.push(c);
        }
    }

    out
}

const DROPPED_NAMESPACES: [&str; 3] = ["file:", "image:", "category:"];

/// `[[target|label]]` becomes `label`, `[[target]]` becomes `target`
fn replace_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = find_link_end(after) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let inner = &after[..end];
        let lower = inner.trim_start().to_lowercase();
        if !DROPPED_NAMESPACES.iter().any(|ns| lower.starts_with(ns)) {
            let shown = inner.rsplit('|').next().unwrap_or(inner);
            // Nested links inside a caption are resolved recursively
            out.push_str(&replace_links(shown));
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn find_link_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'[', b'[') => {
                depth += 1;
                i += 2;
            },
            (b']', b']') if depth == 0 => return Some(i),
            (b']', b']') => {
                depth -= 1;
                i += 2;
            },
            _ => i += 1,
        }
    }
    None
}

const ENTITIES: [(&str, &str); 7] = [
    ("&nbsp;", " "),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&amp;", "&"),
];

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_marker_from_first_infobox() {
        let body = "{{Short description|x}}\n{{Infobox football biography\n| name = X }}\n{{Infobox person}}";
        assert_eq!(type_marker(body).as_deref(), Some("football biography"));
        assert_eq!(type_marker("{{infobox_Country|a=1}}").as_deref(), Some("country"));
        assert_eq!(type_marker("{{ Infobox  Body of   water }}").as_deref(), Some("body of water"));
    }

    #[test]
    fn test_type_marker_skips_empty_infobox_names() {
        assert_eq!(type_marker("{{Infobox|a=b}} {{Infobox settlement}}").as_deref(), Some("settlement"));
        assert_eq!(type_marker("{{Infobox}}"), None);
        assert_eq!(type_marker("plain text"), None);
    }

    #[test]
    fn test_type_marker_taxonomy_boxes() {
        assert_eq!(type_marker("{{Speciesbox\n| genus = Panthera}}").as_deref(), Some("speciesbox"));
        assert_eq!(type_marker("{{Automatic taxobox|taxon=Felis}}").as_deref(), Some("automatic taxobox"));
        assert_eq!(type_marker("{{Taxobox colour}}"), None);
    }

    #[test]
    fn test_strip_removes_templates_refs_and_comments() {
        let body = "{{Infobox country|population=83190556}}\nGermany<ref name=\"a\">Census 2011</ref> has \
                    <!-- 999 -->16 states.<ref name=b/> {{cite|year=2020|{{nested|7}}}}";
        assert_eq!(strip_markup(body).trim(), "Germany has 16 states.");
    }

    #[test]
    fn test_strip_links_and_formatting() {
        let body = "'''Berlin''' is the [[capital city|capital]] of [[Germany]].\
                    [[File:Berlin 2019.jpg|thumb|View in [[2019]]]][[Category:Cities]] \
                    See [https://example.org/page2 the site].";
        assert_eq!(
            strip_markup(body),
            "Berlin is the capital of Germany. See the site."
        );
    }

    #[test]
    fn test_strip_tables_headings_and_entities() {
        let body = "== History ==\nBefore\n{| class=\"wikitable\"\n| 1990 || 2000\n|}\nAfter&nbsp;5&amp;6 <small>small</small>";
        assert_eq!(strip_markup(body), "History\nBefore\n\nAfter 5&6 small");
    }

    #[test]
    fn test_strip_never_adds_digits() {
        let body = "&#49; [[a|b]] {{x}} <b>q</b> '''w''' == h ==";
        let digits = |s: &str| s.bytes().filter(u8::is_ascii_digit).count();
        assert!(digits(&strip_markup(body)) <= digits(body));
    }
}
