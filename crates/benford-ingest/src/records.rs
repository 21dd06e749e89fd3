//! Streaming page decoder
//!
//! Walks the XML event stream of a decompressed chunk and yields one page at
//! a time, so memory stays bounded by the largest single page.

use crate::error::RecordError;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::BufRead;
use thiserror::Error;

/// One main-namespace article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Article(Record),
    /// Talk pages, templates, user pages and other namespaces
    NonArticle,
    Malformed(RecordError),
}

/// Failures that make the rest of the stream unreadable
#[derive(Error, Debug)]
pub enum PageReadError {
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("stream ended inside a page")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Id,
    Namespace,
    Text,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"id" => Some(Field::Id),
            b"ns" => Some(Field::Namespace),
            b"text" => Some(Field::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PartialPage {
    title: Option<String>,
    id: Option<String>,
    namespace: Option<String>,
    text: Option<String>,
}

impl PartialPage {
    fn set(&mut self, field: Field, value: String) {
        match field {
            Field::Title => self.title = Some(value),
            // Revision and contributor ids come later and are ignored
            Field::Id if self.id.is_none() => self.id = Some(value),
            Field::Id => {},
            Field::Namespace => self.namespace = Some(value),
            Field::Text => self.text = Some(value),
        }
    }

    fn finish(self) -> PageOutcome {
        let is_article = self
            .namespace
            .as_deref()
            .map_or(true, |ns| ns.trim() == "0");
        if !is_article {
            return PageOutcome::NonArticle;
        }

        let id = match self.id.as_deref().map(str::trim) {
            None | Some("") => return PageOutcome::Malformed(RecordError::MissingId),
            Some(raw) => match raw.parse::<u64>() {
                Ok(id) => id,
                Err(_) => return PageOutcome::Malformed(RecordError::InvalidId(raw.to_string())),
            },
        };

        match self.text {
            Some(body) => PageOutcome::Article(Record {
                id,
                title: self.title.unwrap_or_default(),
                body,
            }),
            None => PageOutcome::Malformed(RecordError::MissingText(id)),
        }
    }
}

pub struct PageReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> PageReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        // Chunks start and end mid-document, so closing tags may have no opener
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    /// Decode the next page, or `None` at end of stream
    pub fn next_page(&mut self) -> Result<Option<PageOutcome>, PageReadError> {
        let mut page: Option<PartialPage> = None;
        let mut field: Option<Field> = None;
        let mut value = String::new();

        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|source| PageReadError::Xml {
                    position: self.reader.buffer_position(),
                    source,
                })?;

            match event {
                Event::Start(ref e) => {
                    let name = e.name();
                    if name.as_ref() == b"page" {
                        page = Some(PartialPage::default());
                        field = None;
                    } else if page.is_some() {
                        if let Some(f) = Field::from_tag(name.as_ref()) {
                            field = Some(f);
                            value.clear();
                        }
                    }
                },
                Event::Empty(ref e) => {
                    if let (Some(p), Some(Field::Text)) = (page.as_mut(), Field::from_tag(e.name().as_ref())) {
                        p.set(Field::Text, String::new());
                    }
                },
                Event::Text(ref e) => {
                    if field.is_some() {
                        match e.unescape() {
                            Ok(text) => value.push_str(&text),
                            Err(_) => value.push_str(&String::from_utf8_lossy(e)),
                        }
                    }
                },
                Event::CData(ref e) => {
                    if field.is_some() {
                        value.push_str(&String::from_utf8_lossy(e));
                    }
                },
                Event::End(ref e) => {
                    let name = e.name();
                    if name.as_ref() == b"page" {
                        if let Some(done) = page.take() {
                            return Ok(Some(done.finish()));
                        }
                    } else if let (Some(p), Some(f)) = (page.as_mut(), field) {
                        if Field::from_tag(name.as_ref()) == Some(f) {
                            p.set(f, std::mem::take(&mut value));
                            field = None;
                        }
                    }
                },
                Event::Eof => {
                    return match page {
                        Some(_) => Err(PageReadError::Truncated),
                        None => Ok(None),
                    };
                },
                _ => {},
            }
        }
    }
}

impl<R: BufRead> Iterator for PageReader<R> {
    type Item = Result<PageOutcome, PageReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pages(xml: &str) -> Vec<PageOutcome> {
        PageReader::new(Cursor::new(xml.as_bytes().to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    const SITEINFO: &str = "<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.10/\">\n<siteinfo><sitename>Wikipedia</sitename></siteinfo>\n";

    #[test]
    fn test_reads_article_with_page_id_not_revision_id() {
        let xml = format!(
            "{}<page><title>Germany</title><ns>0</ns><id>11867</id><revision><id>99</id>\
             <contributor><id>5</id></contributor><text bytes=\"30\">{{{{Infobox country}}}} 83&amp;190</text>\
             </revision></page>",
            SITEINFO
        );
        let out = pages(&xml);
        assert_eq!(
            out,
            vec![PageOutcome::Article(Record {
                id: 11867,
                title: "Germany".to_string(),
                body: "{{Infobox country}} 83&190".to_string(),
            })]
        );
    }

    #[test]
    fn test_non_article_namespaces_are_flagged() {
        let xml = "<page><title>Talk:X</title><ns>1</ns><id>3</id><revision><text>1</text></revision></page>\
                   <page><title>Y</title><id>4</id><revision><text>2</text></revision></page>";
        let out = pages(xml);
        assert_eq!(out[0], PageOutcome::NonArticle);
        assert!(matches!(out[1], PageOutcome::Article(Record { id: 4, .. })));
    }

    #[test]
    fn test_malformed_pages_do_not_stop_the_stream() {
        let xml = "<page><title>A</title><ns>0</ns><id>abc</id><revision><text>1</text></revision></page>\
                   <page><title>B</title><ns>0</ns><revision><text>1</text></revision></page>\
                   <page><title>C</title><ns>0</ns><id>7</id><revision></revision></page>\
                   <page><title>D</title><ns>0</ns><id>8</id><revision><text bytes=\"0\" /></revision></page>";
        let out = pages(xml);
        assert_eq!(out[0], PageOutcome::Malformed(RecordError::InvalidId("abc".into())));
        assert_eq!(out[1], PageOutcome::Malformed(RecordError::MissingId));
        assert_eq!(out[2], PageOutcome::Malformed(RecordError::MissingText(7)));
        assert!(matches!(&out[3], PageOutcome::Article(r) if r.body.is_empty()));
    }

    #[test]
    fn test_chunk_tail_without_mediawiki_close_is_fine() {
        let xml = "<page><ns>0</ns><id>1</id><revision><text>x</text></revision></page>\n</mediawiki>\n";
        assert_eq!(pages(xml).len(), 1);
    }

    #[test]
    fn test_truncated_page_is_an_error() {
        let xml = "<page><ns>0</ns><id>1</id><revision><text>cut";
        let mut reader = PageReader::new(Cursor::new(xml.as_bytes().to_vec()));
        assert!(matches!(reader.next_page(), Err(PageReadError::Truncated)));
    }
}
