//! Common fixtures for pipeline integration tests
//!
//! Builds small multistream dumps the way the real ones are laid out: a
//! header stream holding `<siteinfo>`, one bzip2 stream per group of pages,
//! and a footer stream closing `</mediawiki>`. The matching index lists
//! `offset:id:title` for every page.

#![allow(dead_code, clippy::unwrap_used)]

use benford_ingest::config::PipelineConfig;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct TestPage {
    pub id: u64,
    pub title: String,
    pub namespace: u32,
    pub text: String,
}

impl TestPage {
    pub fn article(id: u64, text: &str) -> Self {
        Self {
            id,
            title: format!("Article {}", id),
            namespace: 0,
            text: text.to_string(),
        }
    }

    fn to_xml(&self) -> String {
        format!(
            "  <page>\n    <title>{}</title>\n    <ns>{}</ns>\n    <id>{}</id>\n    <revision>\n      <id>{}</id>\n      <text bytes=\"{}\" xml:space=\"preserve\">{}</text>\n    </revision>\n  </page>\n",
            self.title,
            self.namespace,
            self.id,
            self.id + 100_000,
            self.text.len(),
            escape(&self.text)
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn bz2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// One stream of an archive under construction
pub enum Stream {
    Pages(Vec<TestPage>),
    /// Bytes that look like a stream header but do not decode
    Garbage { ids: Vec<u64> },
}

pub struct TestDump {
    pub archive: PathBuf,
    pub index: PathBuf,
}

/// Write `dump.xml.bz2` and `index.txt` under `dir`
pub fn write_dump(dir: &Path, streams: Vec<Stream>) -> TestDump {
    let mut archive = bz2(
        b"<mediawiki xml:lang=\"en\">\n  <siteinfo>\n    <sitename>Wikipedia</sitename>\n  </siteinfo>\n",
    );
    let mut index = String::new();

    for stream in streams {
        let offset = archive.len();
        match stream {
            Stream::Pages(pages) => {
                let xml: String = pages.iter().map(TestPage::to_xml).collect();
                for page in &pages {
                    index.push_str(&format!("{}:{}:{}\n", offset, page.id, page.title));
                }
                archive.extend(bz2(xml.as_bytes()));
            },
            Stream::Garbage { ids } => {
                for id in ids {
                    index.push_str(&format!("{}:{}:Garbage {}\n", offset, id, id));
                }
                archive.extend_from_slice(b"BZh91AY&SY");
                archive.extend(std::iter::repeat(0xA5u8).take(512));
            },
        }
    }
    archive.extend(bz2(b"</mediawiki>\n"));

    let archive_path = dir.join("dump.xml.bz2");
    std::fs::write(&archive_path, archive).unwrap();
    let index_path = dir.join("index.txt");
    std::fs::write(&index_path, index).unwrap();

    TestDump {
        archive: archive_path,
        index: index_path,
    }
}

/// `streams` streams of `per_stream` articles, each with a few numbers
pub fn numbered_dump(dir: &Path, streams: usize, per_stream: usize) -> TestDump {
    let mut id = 0u64;
    let streams = (0..streams)
        .map(|s| {
            let pages = (0..per_stream)
                .map(|_| {
                    id += 1;
                    let marker = if id % 2 == 0 { "country" } else { "film" };
                    TestPage::article(
                        id,
                        &format!(
                            "{{{{Infobox {} | founded = 1066}}}}\nIn stream {} the figure was {} and later {}.5",
                            marker,
                            s + 1,
                            id * 37 + 11,
                            id + 2
                        ),
                    )
                })
                .collect();
            Stream::Pages(pages)
        })
        .collect();
    write_dump(dir, streams)
}

pub fn config_for(dir: &Path, dump: &TestDump, chunks: usize, workers: usize) -> PipelineConfig {
    PipelineConfig {
        archive_path: dump.archive.clone(),
        index_path: dump.index.clone(),
        work_dir: dir.join("work"),
        output_path: dir.join("out").join("numbers.csv"),
        summary_path: dir.join("out").join("summary.json"),
        workers,
        chunks: Some(chunks),
        ..PipelineConfig::default()
    }
}
