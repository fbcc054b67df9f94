//! WAL compaction
//!
//! Removes segments whose entire content is captured by the primary
//! snapshot. Only segments numbered strictly below the snapshot's segment
//! qualify, because the snapshot's own segment may still hold commits past the
//! snapshot offset.
//!
//! Before anything is deleted, the commits of the doomed range are absorbed
//! into the head snapshot, so every commit id below the watermark remains
//! recoverable from either the primary or the head snapshot. Deletions then
//! proceed in ascending segment order; an interrupted pass leaves no gap
//! that is not covered by a snapshot.

use crate::commit::CommitId;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::wal::reader::WalReader;
use crate::wal::{list_segment_files, segment_path};
use hearth_core::error::Result;
use hearth_core::store::apply_commit;
use hearth_core::value::now_millis;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// What a compaction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Segments removed, ascending.
    pub segments_removed: Vec<u32>,
    /// Commit id of the head snapshot after the pass, when one was written.
    pub head_commit_id: Option<CommitId>,
}

/// Prunes WAL segments covered by the primary snapshot.
pub struct Compactor {
    wal_dir: PathBuf,
    head_store: SnapshotStore,
}

impl Compactor {
    /// Create a compactor over a WAL directory and the head-snapshot store.
    pub fn new(wal_dir: PathBuf, head_store: SnapshotStore) -> Self {
        Compactor {
            wal_dir,
            head_store,
        }
    }

    /// Run one compaction pass against the given primary-snapshot commit id.
    ///
    /// Idempotent: when no segment lies below the watermark the pass is a
    /// no-op and the head snapshot is left untouched.
    pub fn compact(&self, snapshot_commit_id: CommitId) -> Result<CompactionOutcome> {
        let segments = list_segment_files(&self.wal_dir)?;
        let to_delete: Vec<u32> = segments
            .keys()
            .copied()
            .filter(|&n| n < snapshot_commit_id.segment)
            .collect();

        if to_delete.is_empty() {
            debug!(
                target: "hearth::compaction",
                watermark = %snapshot_commit_id,
                "No segments below the watermark, nothing to compact"
            );
            return Ok(CompactionOutcome::default());
        }

        info!(
            target: "hearth::compaction",
            watermark = %snapshot_commit_id,
            segments = to_delete.len(),
            "Compaction started"
        );

        // Absorb the doomed range into the head snapshot before deleting
        let base = self.head_store.load()?.unwrap_or_else(Snapshot::empty);
        let reader = WalReader::new(self.wal_dir.clone());
        let pairs = reader.read_until(base.commit_id, Some(snapshot_commit_id.segment))?;

        let mut data = base.data;
        let mut last = base.commit_id;
        for (id, commit) in &pairs {
            apply_commit(&mut data, commit);
            last = Some(*id);
        }

        let head = Snapshot {
            commit_id: last,
            ts: now_millis(),
            data,
        };
        self.head_store.save(&head)?;

        let mut removed = Vec::with_capacity(to_delete.len());
        for segment in to_delete {
            self.remove_segment(segment)?;
            removed.push(segment);
        }

        info!(
            target: "hearth::compaction",
            removed = removed.len(),
            head = ?head.commit_id,
            "Compaction completed"
        );
        Ok(CompactionOutcome {
            segments_removed: removed,
            head_commit_id: head.commit_id,
        })
    }

    /// Delete both on-disk forms of a segment.
    fn remove_segment(&self, segment: u32) -> Result<()> {
        for compressed in [false, true] {
            let path = segment_path(&self.wal_dir, segment, compressed);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        target: "hearth::compaction",
                        segment,
                        error = %e,
                        "Failed to remove WAL segment"
                    );
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::segment_filename;
    use crate::snapshot::SnapshotStore;
    use crate::wal::config::WalConfig;
    use crate::wal::writer::WalWriter;
    use hearth_core::context::ContextPath;
    use hearth_core::store::{Op, StoreData};
    use hearth_core::value::Value;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::tempdir;

    fn set_op(context: &str, key: &str, value: i64) -> Op {
        Op::Set {
            context: ContextPath::parse_storage_key(context).unwrap(),
            values: BTreeMap::from([(key.to_string(), Value::Int(value))]),
        }
    }

    /// Write `per_segment` commits into each of `segments` segment files by
    /// rotating on line count through a tiny size threshold probe.
    fn fill_segments(wal_dir: &Path, segments: u32, per_segment: u32) -> Vec<CommitId> {
        // Measure one line, then size the threshold so exactly
        // `per_segment` lines fit.
        let probe_dir = wal_dir.with_extension("probe");
        let mut probe = WalWriter::new(probe_dir.clone(), WalConfig::default());
        probe.append(&[set_op("ctx", "key", 0)]).unwrap();
        probe.close().unwrap();
        let line_len = std::fs::metadata(probe_dir.join(segment_filename(1)))
            .unwrap()
            .len();

        let mut writer = WalWriter::new(
            wal_dir.to_path_buf(),
            WalConfig::new().with_max_segment_size(per_segment as u64 * line_len),
        );
        let mut ids = Vec::new();
        for i in 0..(segments * per_segment) {
            ids.push(writer.append(&[set_op("ctx", "key", i as i64)]).unwrap().id);
        }
        writer.close().unwrap();
        ids
    }

    fn head_store(dir: &Path) -> SnapshotStore {
        SnapshotStore::head(dir.to_path_buf(), true)
    }

    #[test]
    fn test_compact_removes_covered_segments() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let ids = fill_segments(&wal_dir, 3, 2);
        assert_eq!(ids.last().unwrap().segment, 3);

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));
        let outcome = compactor.compact(CommitId::new(3, 0)).unwrap();

        assert_eq!(outcome.segments_removed, vec![1, 2]);
        assert!(!wal_dir.join(segment_filename(1)).exists());
        assert!(!wal_dir.join(segment_filename(2)).exists());
        assert!(wal_dir.join(segment_filename(3)).exists());

        // Head snapshot captured the last commit of segment 2
        assert_eq!(outcome.head_commit_id, Some(CommitId::new(2, 1)));
        let head = head_store(dir.path()).load().unwrap().unwrap();
        assert_eq!(head.commit_id, Some(CommitId::new(2, 1)));
        // Last absorbed write was commit index 3 (segment 2, offset 1)
        assert_eq!(
            head.data.get("ctx").unwrap().get("key"),
            Some(&Value::Int(3))
        );
    }

    #[test]
    fn test_compact_is_idempotent() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        fill_segments(&wal_dir, 3, 2);

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));
        let first = compactor.compact(CommitId::new(3, 0)).unwrap();
        assert_eq!(first.segments_removed, vec![1, 2]);

        let second = compactor.compact(CommitId::new(3, 0)).unwrap();
        assert!(second.segments_removed.is_empty());

        // Head snapshot untouched by the no-op pass
        let head = head_store(dir.path()).load().unwrap().unwrap();
        assert_eq!(head.commit_id, Some(CommitId::new(2, 1)));
    }

    #[test]
    fn test_compact_nothing_below_watermark() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        fill_segments(&wal_dir, 1, 3);

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));
        let outcome = compactor.compact(CommitId::new(1, 2)).unwrap();

        assert!(outcome.segments_removed.is_empty());
        assert!(wal_dir.join(segment_filename(1)).exists());
        // No head snapshot was produced
        assert!(head_store(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_incremental_head_snapshot_builds_on_previous() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        fill_segments(&wal_dir, 4, 2);

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));

        compactor.compact(CommitId::new(2, 0)).unwrap();
        let head = head_store(dir.path()).load().unwrap().unwrap();
        assert_eq!(head.commit_id, Some(CommitId::new(1, 1)));

        compactor.compact(CommitId::new(4, 0)).unwrap();
        let head = head_store(dir.path()).load().unwrap().unwrap();
        assert_eq!(head.commit_id, Some(CommitId::new(3, 1)));
        // The cumulative value survived both passes: commit index 5 was the
        // last write in segment 3
        assert_eq!(
            head.data.get("ctx").unwrap().get("key"),
            Some(&Value::Int(5))
        );
    }

    #[test]
    fn test_compact_removes_compressed_forms_too() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        fill_segments(&wal_dir, 2, 2);
        crate::codec::recompress_segment(&wal_dir, 1).unwrap();

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));
        let outcome = compactor.compact(CommitId::new(2, 0)).unwrap();

        assert_eq!(outcome.segments_removed, vec![1]);
        assert!(!wal_dir.join(segment_filename(1)).exists());
        assert!(!wal_dir
            .join(crate::commit::compressed_segment_filename(1))
            .exists());
    }

    #[test]
    fn test_replay_after_compaction_matches_full_state() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let ids = fill_segments(&wal_dir, 3, 2);

        // Full state before compaction
        let mut full = StoreData::new();
        for (_, commit) in WalReader::new(wal_dir.clone()).read(None).unwrap() {
            apply_commit(&mut full, &commit);
        }

        let compactor = Compactor::new(wal_dir.clone(), head_store(dir.path()));
        compactor.compact(CommitId::new(ids.last().unwrap().segment, 0)).unwrap();

        // Head snapshot plus remaining WAL reproduces the same state
        let head = head_store(dir.path()).load().unwrap().unwrap();
        let mut rebuilt = head.data.clone();
        for (_, commit) in WalReader::new(wal_dir).read(head.commit_id).unwrap() {
            apply_commit(&mut rebuilt, &commit);
        }
        assert_eq!(rebuilt, full);
    }
}
