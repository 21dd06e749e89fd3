//! Chunk planning over the byte-indexed archive
//!
//! Records are grouped into `N` runs of roughly equal size, then each group
//! boundary is moved forward to the next stream boundary so that no
//! compressed stream is split between two chunks.

use crate::archive::{probe_boundary, ArchiveFormat};
use crate::error::{PipelineError, Result};
use crate::index::IndexEntry;
use benford_common::checksum::digest_bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Byte range `[start_offset, end_offset)` of the compressed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub ordinal: usize,
    pub start_offset: u64,
    pub end_offset: u64,
    /// Index entries whose stream lies in this range
    pub record_hint: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub format: ArchiveFormat,
    pub archive_len: u64,
    pub requested_chunks: usize,
    pub sample: Option<usize>,
    /// Set when stream boundaries could not be verified
    pub single_chunk_fallback: bool,
    pub chunks: Vec<Chunk>,
}

/// Identity of a plan, compared on resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFingerprint {
    pub chunk_count: usize,
    pub boundaries: Vec<u64>,
    pub digest: String,
}

impl ChunkPlan {
    pub fn fingerprint(&self) -> PlanFingerprint {
        let mut boundaries: Vec<u64> = self.chunks.iter().map(|c| c.start_offset).collect();
        if let Some(last) = self.chunks.last() {
            boundaries.push(last.end_offset);
        }

        let canonical = format!(
            "{}|{}|{}",
            self.format,
            self.archive_len,
            boundaries
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        );

        PlanFingerprint {
            chunk_count: self.chunks.len(),
            boundaries,
            digest: digest_bytes(canonical.as_bytes()),
        }
    }

    pub fn total_records(&self) -> u64 {
        self.chunks.iter().map(|c| c.record_hint).sum()
    }
}

/// Sort entries the way the archive lays them out
pub fn sort_entries(entries: &mut [IndexEntry]) {
    entries.sort_unstable();
}

/// Partition sorted index entries into at most `requested` chunks covering
/// `[0, archive_len)`
pub fn plan_chunks(
    sorted: &[IndexEntry],
    requested: usize,
    archive_len: u64,
) -> Result<Vec<Chunk>> {
    if sorted.is_empty() {
        return Err(PipelineError::config("index contains no records"));
    }
    if requested == 0 {
        return Err(PipelineError::config("chunk count must be greater than 0"));
    }
    if requested > sorted.len() {
        return Err(PipelineError::config(format!(
            "requested {} chunks but the index only lists {} records",
            requested,
            sorted.len()
        )));
    }
    if let Some(last) = sorted.last() {
        if last.offset >= archive_len {
            return Err(PipelineError::config(format!(
                "index offset {} lies beyond the archive length {}",
                last.offset, archive_len
            )));
        }
    }

    let total = sorted.len();
    let base = total / requested;

    // Index positions where each chunk's first record sits
    let mut starts: Vec<usize> = vec![0];
    for group in 1..requested {
        let Some(snapped) = next_stream_start(sorted, group * base) else {
            continue;
        };
        if starts.last().is_some_and(|prev| snapped <= *prev) {
            continue;
        }
        starts.push(snapped);
    }

    if starts.len() < requested {
        warn!(
            requested,
            planned = starts.len(),
            "Stream boundaries allow fewer chunks than requested"
        );
    }

    let chunks = starts
        .iter()
        .enumerate()
        .map(|(ordinal, &first)| {
            let next = starts.get(ordinal + 1).copied();
            let start_offset = if ordinal == 0 { 0 } else { sorted[first].offset };
            let end_offset = next.map_or(archive_len, |n| sorted[n].offset);
            let record_hint = (next.unwrap_or(total) - first) as u64;
            Chunk {
                ordinal,
                start_offset,
                end_offset,
                record_hint,
            }
        })
        .collect();

    Ok(chunks)
}

/// First position at or after `from` that opens a new stream
fn next_stream_start(sorted: &[IndexEntry], from: usize) -> Option<usize> {
    (from.max(1)..sorted.len()).find(|&i| sorted[i].offset != sorted[i - 1].offset)
}

/// Keep the first `k` entries, rounded up to whole streams
///
/// Returns the retained entries and the byte offset where the excluded part
/// of the archive begins.
pub fn sample_entries(sorted: &[IndexEntry], k: usize, archive_len: u64) -> (&[IndexEntry], u64) {
    if k == 0 || k >= sorted.len() {
        return (sorted, archive_len);
    }
    match next_stream_start(sorted, k) {
        Some(cut) => (&sorted[..cut], sorted[cut].offset),
        None => (sorted, archive_len),
    }
}

/// Build a full plan, verifying that every chunk start is decodable
///
/// When any boundary fails the probe the archive cannot be split safely and
/// a single chunk over the whole file is returned instead. A sampled plan
/// has no such fallback, since one chunk would cover far more than the
/// sample.
pub fn build_plan(
    archive: &Path,
    format: ArchiveFormat,
    archive_len: u64,
    mut entries: Vec<IndexEntry>,
    requested: usize,
    sample: Option<usize>,
) -> Result<ChunkPlan> {
    sort_entries(&mut entries);

    let (selected, plan_len) = match sample {
        Some(k) => sample_entries(&entries, k, archive_len),
        None => (entries.as_slice(), archive_len),
    };

    let requested_here = match sample {
        Some(_) if requested > selected.len() => {
            info!(
                requested,
                sampled = selected.len(),
                "Reducing chunk count to the sample size"
            );
            selected.len()
        },
        _ => requested,
    };

    let chunks = plan_chunks(selected, requested_here, plan_len)?;

    let mut probes: Vec<u64> = chunks
        .iter()
        .skip(1)
        .map(|c| c.start_offset)
        .collect();
    if plan_len < archive_len {
        probes.push(plan_len);
    }

    for offset in probes {
        if !probe_boundary(archive, format, offset)? {
            if sample.is_some() {
                return Err(PipelineError::config(format!(
                    "cannot sample: no independently decodable stream at offset {}",
                    offset
                )));
            }
            warn!(
                offset,
                format = %format,
                "No independently decodable stream at planned boundary, falling back to a single chunk"
            );
            return Ok(ChunkPlan {
                format,
                archive_len,
                requested_chunks: requested,
                sample,
                single_chunk_fallback: true,
                chunks: vec![Chunk {
                    ordinal: 0,
                    start_offset: 0,
                    end_offset: archive_len,
                    record_hint: entries.len() as u64,
                }],
            });
        }
    }

    info!(
        chunks = chunks.len(),
        records = selected.len(),
        bytes = plan_len,
        "Planned chunks"
    );

    Ok(ChunkPlan {
        format,
        archive_len,
        requested_chunks: requested,
        sample,
        single_chunk_fallback: false,
        chunks,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn entries(offsets: &[u64]) -> Vec<IndexEntry> {
        offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| IndexEntry {
                offset,
                record_id: i as u64 + 1,
            })
            .collect()
    }

    #[test]
    fn test_plan_rejects_bad_requests() {
        assert!(matches!(
            plan_chunks(&[], 1, 100),
            Err(PipelineError::Configuration(_))
        ));
        let e = entries(&[10, 20]);
        assert!(plan_chunks(&e, 0, 100).is_err());
        assert!(plan_chunks(&e, 3, 100).is_err());
        assert!(plan_chunks(&e, 1, 20).is_err());
    }

    #[test]
    fn test_last_chunk_absorbs_remainder() {
        let e = entries(&[0, 10, 20, 30, 40, 50, 60]);
        let chunks = plan_chunks(&e, 3, 100).unwrap();
        let hints: Vec<u64> = chunks.iter().map(|c| c.record_hint).collect();
        assert_eq!(hints, vec![2, 2, 3]);
        assert_eq!(chunks[1].start_offset, 20);
        assert_eq!(chunks[2].start_offset, 40);
        assert_eq!(chunks[2].end_offset, 100);
    }

    #[test]
    fn test_boundaries_snap_to_streams() {
        // Two streams of three records each plus a final one
        let e = entries(&[100, 100, 100, 200, 200, 200, 300]);
        let chunks = plan_chunks(&e, 3, 400).unwrap();
        assert_eq!(
            chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect::<Vec<_>>(),
            vec![(0, 200), (200, 300), (300, 400)]
        );
        assert_eq!(chunks[0].record_hint, 3);
    }

    #[test]
    fn test_collapsed_boundaries_are_dropped() {
        let e = entries(&[50, 50, 50, 50]);
        let chunks = plan_chunks(&e, 4, 80).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 80));
        assert_eq!(chunks[0].record_hint, 4);
    }

    #[test]
    fn test_sample_rounds_up_to_whole_streams() {
        let e = entries(&[10, 10, 20, 20, 30]);
        let (kept, cut) = sample_entries(&e, 3, 40);
        assert_eq!(kept.len(), 4);
        assert_eq!(cut, 30);

        let (kept, cut) = sample_entries(&e, 10, 40);
        assert_eq!(kept.len(), 5);
        assert_eq!(cut, 40);
    }

    #[test]
    fn test_fingerprint_tracks_boundaries() {
        let e = entries(&[0, 10, 20, 30]);
        let plan = |n| ChunkPlan {
            format: ArchiveFormat::Bzip2,
            archive_len: 50,
            requested_chunks: n,
            sample: None,
            single_chunk_fallback: false,
            chunks: plan_chunks(&e, n, 50).unwrap(),
        };
        let two = plan(2).fingerprint();
        assert_eq!(two.boundaries, vec![0, 20, 50]);
        assert_eq!(two, plan(2).fingerprint());
        assert_ne!(two.digest, plan(4).fingerprint().digest);
    }

    #[test]
    fn test_build_plan_falls_back_when_boundaries_are_not_streams() {
        // One bzip2 stream holding everything, but the index claims two
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder
            .write_all(b"<page><id>1</id></page><page><id>2</id></page>")
            .unwrap();
        let data = encoder.finish().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let len = data.len() as u64;
        let plan = build_plan(
            file.path(),
            ArchiveFormat::Bzip2,
            len,
            entries(&[0, len / 2]),
            2,
            None,
        )
        .unwrap();

        assert!(plan.single_chunk_fallback);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].end_offset, len);
    }

    #[test]
    fn test_sample_is_rejected_when_the_cut_is_not_a_stream() {
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder
            .write_all(b"<page><id>1</id></page><page><id>2</id></page>")
            .unwrap();
        let data = encoder.finish().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let len = data.len() as u64;
        let result = build_plan(
            file.path(),
            ArchiveFormat::Bzip2,
            len,
            entries(&[0, len / 2]),
            1,
            Some(1),
        );

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    proptest! {
        #[test]
        fn prop_chunks_partition_archive(
            offsets in prop::collection::vec(0u64..5_000, 1..150),
            pick in any::<usize>(),
            tail in 1u64..500,
        ) {
            let mut e = entries(&offsets);
            sort_entries(&mut e);
            let archive_len = e.last().unwrap().offset + tail;
            let requested = pick % e.len() + 1;

            let chunks = plan_chunks(&e, requested, archive_len).unwrap();

            prop_assert!(!chunks.is_empty());
            prop_assert!(chunks.len() <= requested);
            prop_assert_eq!(chunks[0].start_offset, 0);
            prop_assert_eq!(chunks.last().unwrap().end_offset, archive_len);
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end_offset, pair[1].start_offset);
            }
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.ordinal, i);
                prop_assert!(!chunk.is_empty());
                if i > 0 {
                    prop_assert!(e.iter().any(|x| x.offset == chunk.start_offset));
                }
            }
            let hinted: u64 = chunks.iter().map(|c| c.record_hint).sum();
            prop_assert_eq!(hinted, e.len() as u64);
        }
    }
}
