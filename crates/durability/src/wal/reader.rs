//! WAL reader
//!
//! Produces the ordered sequence of `(CommitId, Commit)` pairs, optionally
//! restricted to ids strictly after a cursor. Compressed and uncompressed
//! segments read the same; when both forms of a segment exist the
//! compressed one wins.
//!
//! Malformed lines are logged and skipped; they consume an offset (the
//! writer counts them too when resuming) but abort nothing. Blank lines are
//! legal noise and do not advance the offset.

use crate::codec::gzip_decompress;
use crate::commit::{decode_line, CommitId};
use crate::wal::{list_segment_files, segment_path, SegmentForms, MAX_SEGMENT_LINES};
use hearth_core::error::Result;
use hearth_core::store::Commit;
use std::path::PathBuf;
use tracing::warn;

/// Reads commits back out of a WAL directory.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    /// Create a reader over a WAL directory.
    pub fn new(wal_dir: PathBuf) -> Self {
        WalReader { wal_dir }
    }

    /// Segment numbers present on disk, ascending, with plain/compressed
    /// pairs deduplicated. A missing directory reads as empty.
    pub fn segments(&self) -> Result<Vec<u32>> {
        Ok(list_segment_files(&self.wal_dir)?.keys().copied().collect())
    }

    /// Replay every commit strictly after `after` (or all of them).
    pub fn read(&self, after: Option<CommitId>) -> Result<Vec<(CommitId, Commit)>> {
        self.read_until(after, None)
    }

    /// Replay commits strictly after `after`, skipping segments numbered at
    /// or above `before_segment` entirely. Used by the compactor, which
    /// only absorbs segments below the snapshot watermark.
    pub fn read_until(
        &self,
        after: Option<CommitId>,
        before_segment: Option<u32>,
    ) -> Result<Vec<(CommitId, Commit)>> {
        let mut pairs = Vec::new();

        for (&segment, forms) in &list_segment_files(&self.wal_dir)? {
            if let Some(cursor) = after {
                if segment < cursor.segment {
                    continue;
                }
            }
            if let Some(boundary) = before_segment {
                if segment >= boundary {
                    break;
                }
            }
            self.read_segment(segment, *forms, after, &mut pairs)?;
        }

        Ok(pairs)
    }

    fn read_segment(
        &self,
        segment: u32,
        forms: SegmentForms,
        after: Option<CommitId>,
        pairs: &mut Vec<(CommitId, Commit)>,
    ) -> Result<()> {
        // Prefer the compressed form when both exist
        let bytes = if forms.compressed {
            let raw = std::fs::read(segment_path(&self.wal_dir, segment, true))?;
            gzip_decompress(&raw)?
        } else {
            std::fs::read(segment_path(&self.wal_dir, segment, false))?
        };
        let text = String::from_utf8_lossy(&bytes);

        let mut offset: u32 = 0;
        for line in text.split('\n') {
            if line.trim().is_empty() {
                // Blank lines are noise and do not advance the offset
                continue;
            }
            if offset > MAX_SEGMENT_LINES {
                warn!(
                    target: "hearth::wal",
                    segment,
                    "Segment exceeds the line cap, ignoring the remainder"
                );
                break;
            }

            let id = CommitId::new(segment, offset as u16);
            offset += 1;

            match decode_line(line) {
                Ok(commit) => {
                    if after.map_or(true, |cursor| id > cursor) {
                        pairs.push((id, commit));
                    }
                }
                Err(e) => {
                    // Truncated trailing lines land here too; replay goes on
                    warn!(
                        target: "hearth::wal",
                        segment,
                        offset = id.offset,
                        error = %e,
                        "Skipping malformed WAL line"
                    );
                }
            }
        }

        Ok(())
    }
}
