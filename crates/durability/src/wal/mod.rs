//! Segmented write-ahead log
//!
//! Segments are bounded files of commit lines named `NNNNNNNN.jsonl`
//! (8 hex digits), optionally rewritten as `NNNNNNNN.jsonl.gz` once closed.
//! The writer appends to the highest-numbered segment; the reader replays
//! commits in `(segment, offset)` order.

pub mod config;
pub mod reader;
pub mod writer;

use crate::commit::parse_segment_filename;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum number of commit lines per segment. Offsets are 16-bit, so a
/// writer rotates before this many lines accumulate.
pub const MAX_SEGMENT_LINES: u32 = (1 << 16) - 1;

/// Which on-disk forms exist for a segment number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentForms {
    /// `NNNNNNNN.jsonl` exists
    pub plain: bool,
    /// `NNNNNNNN.jsonl.gz` exists
    pub compressed: bool,
}

/// Path of a segment file.
pub fn segment_path(wal_dir: &Path, segment: u32, compressed: bool) -> PathBuf {
    if compressed {
        wal_dir.join(crate::commit::compressed_segment_filename(segment))
    } else {
        wal_dir.join(crate::commit::segment_filename(segment))
    }
}

/// List segment files in a WAL directory, merging plain/compressed pairs.
///
/// Non-segment entries are ignored. A missing directory reads as empty.
pub fn list_segment_files(wal_dir: &Path) -> io::Result<BTreeMap<u32, SegmentForms>> {
    let mut segments: BTreeMap<u32, SegmentForms> = BTreeMap::new();

    let entries = match std::fs::read_dir(wal_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(segments),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(parsed) = parse_segment_filename(&name) {
            let forms = segments.entry(parsed.number).or_default();
            if parsed.compressed {
                forms.compressed = true;
            } else {
                forms.plain = true;
            }
        }
    }

    Ok(segments)
}
