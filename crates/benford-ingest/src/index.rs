//! Multistream index reader
//!
//! Each line is `byte_offset:record_id:title`. Titles may themselves contain
//! colons and are not needed for planning, so only the first two fields are
//! parsed.

use crate::archive::ArchiveFormat;
use crate::error::{PipelineError, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Number of malformed lines reported individually before going quiet
const MALFORMED_LOG_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub offset: u64,
    pub record_id: u64,
}

#[derive(Debug, Default)]
pub struct IndexContents {
    pub entries: Vec<IndexEntry>,
    pub malformed_lines: usize,
}

/// Read a plain, bzip2 or gzip compressed index
pub fn read_index(path: &Path) -> Result<IndexContents> {
    let format = ArchiveFormat::detect(path)?;
    let file = File::open(path)?;

    let reader: Box<dyn Read> = match format {
        Some(ArchiveFormat::Bzip2) => Box::new(MultiBzDecoder::new(file)),
        Some(ArchiveFormat::Gzip) => Box::new(MultiGzDecoder::new(file)),
        _ => Box::new(file),
    };

    let contents = parse_index(BufReader::with_capacity(1024 * 1024, reader))?;
    info!(
        path = %path.display(),
        entries = contents.entries.len(),
        malformed = contents.malformed_lines,
        "Read archive index"
    );
    Ok(contents)
}

pub fn parse_index<R: BufRead>(reader: R) -> Result<IndexContents> {
    let mut contents = IndexContents::default();

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line.map_err(PipelineError::Io)?;
        let line = trim_line(&line);
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Some(entry) => contents.entries.push(entry),
            None => {
                contents.malformed_lines += 1;
                if contents.malformed_lines <= MALFORMED_LOG_LIMIT {
                    warn!(
                        line = line_no + 1,
                        content = %String::from_utf8_lossy(line),
                        "Skipping malformed index line"
                    );
                } else {
                    debug!(line = line_no + 1, "Skipping malformed index line");
                }
            },
        }
    }

    Ok(contents)
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn parse_line(line: &[u8]) -> Option<IndexEntry> {
    let mut fields = line.splitn(3, |b| *b == b':');
    let offset = parse_u64(fields.next()?)?;
    let record_id = parse_u64(fields.next()?)?;
    // The title field must be present even if empty
    fields.next()?;
    Some(IndexEntry { offset, record_id })
}

fn parse_u64(field: &[u8]) -> Option<u64> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}
