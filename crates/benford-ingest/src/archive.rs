//! Compressed archive access
//!
//! A multistream archive is a concatenation of independently compressed
//! streams, so any byte range that starts and ends on stream boundaries can
//! be decompressed on its own. Plain XML is treated the same way with page
//! boundaries standing in for streams.

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const READ_BUFFER_BYTES: usize = 1024 * 1024;
const PROBE_BYTES: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Bzip2,
    Gzip,
    Xml,
}

impl ArchiveFormat {
    /// Identify a format from the first bytes of a file
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if is_bzip2_header(head) {
            Some(ArchiveFormat::Bzip2)
        } else if head.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::Gzip)
        } else if skip_whitespace(head).starts_with(b"<") {
            Some(ArchiveFormat::Xml)
        } else {
            None
        }
    }

    pub fn detect(path: &Path) -> std::io::Result<Option<Self>> {
        let head = read_head(path, 0)?;
        Ok(Self::from_magic(&head))
    }

    /// Whether `head` looks like the start of an independently decodable unit
    pub fn unit_starts_with(self, head: &[u8]) -> bool {
        match self {
            ArchiveFormat::Bzip2 => is_bzip2_header(head),
            ArchiveFormat::Gzip => head.starts_with(&[0x1f, 0x8b]),
            ArchiveFormat::Xml => skip_whitespace(head).starts_with(b"<page"),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFormat::Bzip2 => write!(f, "bzip2"),
            ArchiveFormat::Gzip => write!(f, "gzip"),
            ArchiveFormat::Xml => write!(f, "xml"),
        }
    }
}

fn is_bzip2_header(head: &[u8]) -> bool {
    head.len() >= 4 && head.starts_with(b"BZh") && (b'1'..=b'9').contains(&head[3])
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn read_head(path: &Path, offset: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut head = Vec::with_capacity(PROBE_BYTES as usize);
    file.take(PROBE_BYTES).read_to_end(&mut head)?;
    Ok(head)
}

pub fn archive_len(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Check that a decodable unit begins exactly at `offset`
pub fn probe_boundary(path: &Path, format: ArchiveFormat, offset: u64) -> std::io::Result<bool> {
    let head = read_head(path, offset)?;
    Ok(format.unit_starts_with(&head))
}

/// Stream the decompressed contents of `[start, end)`
///
/// Memory use is bounded by the decoder state and the read buffer regardless
/// of range size.
pub fn open_range(
    path: &Path,
    format: ArchiveFormat,
    start: u64,
    end: u64,
) -> std::io::Result<Box<dyn BufRead + Send>> {
    if end < start {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("range end {} precedes start {}", end, start),
        ));
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let limited = file.take(end - start);

    let decoded: Box<dyn Read + Send> = match format {
        ArchiveFormat::Bzip2 => Box::new(MultiBzDecoder::new(limited)),
        ArchiveFormat::Gzip => Box::new(MultiGzDecoder::new(limited)),
        ArchiveFormat::Xml => Box::new(limited),
    };

    Ok(Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, decoded)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bz2(data: &[u8]) -> Vec<u8> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(mut reader: Box<dyn BufRead + Send>) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_from_magic() {
        assert_eq!(ArchiveFormat::from_magic(b"BZh91AY&SY"), Some(ArchiveFormat::Bzip2));
        assert_eq!(ArchiveFormat::from_magic(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::Gzip));
        assert_eq!(ArchiveFormat::from_magic(b"\n  <mediawiki>"), Some(ArchiveFormat::Xml));
        assert_eq!(ArchiveFormat::from_magic(b"BZh0"), None);
        assert_eq!(ArchiveFormat::from_magic(b"PK\x03\x04"), None);
    }

    #[test]
    fn test_xml_units_start_at_pages() {
        assert!(ArchiveFormat::Xml.unit_starts_with(b"  <page>\n<title>"));
        assert!(!ArchiveFormat::Xml.unit_starts_with(b"<title>A</title>"));
    }

    #[test]
    fn test_open_range_decodes_single_bzip2_stream() {
        let first = bz2(b"<page>one</page>");
        let second = bz2(b"<page>two</page>");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&first).unwrap();
        file.write_all(&second).unwrap();
        file.flush().unwrap();

        let total = (first.len() + second.len()) as u64;
        let split = first.len() as u64;

        let tail = open_range(file.path(), ArchiveFormat::Bzip2, split, total).unwrap();
        assert_eq!(read_all(tail), "<page>two</page>");

        let whole = open_range(file.path(), ArchiveFormat::Bzip2, 0, total).unwrap();
        assert_eq!(read_all(whole), "<page>one</page><page>two</page>");

        assert!(probe_boundary(file.path(), ArchiveFormat::Bzip2, split).unwrap());
        assert!(!probe_boundary(file.path(), ArchiveFormat::Bzip2, split - 3).unwrap());
    }

    #[test]
    fn test_open_range_decodes_gzip_members() {
        let first = gz(b"<page>a</page>");
        let second = gz(b"<page>b</page>");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&first).unwrap();
        file.write_all(&second).unwrap();
        file.flush().unwrap();

        let total = (first.len() + second.len()) as u64;
        let reader = open_range(file.path(), ArchiveFormat::Gzip, 0, total).unwrap();
        assert_eq!(read_all(reader), "<page>a</page><page>b</page>");
        assert_eq!(ArchiveFormat::detect(file.path()).unwrap(), Some(ArchiveFormat::Gzip));
    }

    #[test]
    fn test_open_range_rejects_inverted_range() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(open_range(file.path(), ArchiveFormat::Xml, 10, 5).is_err());
    }
}
