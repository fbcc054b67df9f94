//! End-to-end driver scenarios: commit, reopen, rotation, snapshot,
//! compaction, and recovery from corrupt data.

use hearth_core::context::ContextPath;
use hearth_core::value::Value;
use hearth_durability::commit::{compressed_segment_filename, segment_filename};
use hearth_durability::snapshot::SnapshotStore;
use hearth_durability::wal::config::WalConfig;
use hearth_durability::CommitId;
use hearth_storage::{DriverConfig, WalDriver};
use std::path::Path;
use tempfile::tempdir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn ctx(key: &str) -> ContextPath {
    ContextPath::parse_storage_key(key).unwrap()
}

fn open(dir: &Path) -> WalDriver {
    WalDriver::open(dir, DriverConfig::for_testing()).unwrap()
}

fn segment_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn single_commit_then_reopen() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let driver = open(dir.path());
        let id = driver.set(&ctx("ctx"), "a", Value::Int(1)).unwrap();
        assert_eq!(id, CommitId::new(1, 0));
        driver.close().unwrap();
    }

    // Exactly one segment file with one line whose parsed form is the commit
    let lines = segment_lines(&dir.path().join("wal").join(segment_filename(1)));
    assert_eq!(lines.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert!(parsed["ts"].as_u64().unwrap() > 0);
    assert_eq!(parsed["ops"][0]["op"], "upd");
    assert_eq!(parsed["ops"][0]["key"], "ctx");
    assert_eq!(parsed["ops"][0]["values"]["a"], 1);

    // Reopen with no snapshot on disk: replay rebuilds the cache
    let driver = open(dir.path());
    assert_eq!(driver.get(&ctx("ctx"), "a"), Some(Value::Int(1)));
    assert_eq!(driver.keys(&ctx("ctx")), vec!["a"]);
    assert_eq!(driver.last_commit_id(), Some(CommitId::new(1, 0)));
}

#[test]
fn subtree_delete() {
    init_logging();
    let dir = tempdir().unwrap();
    let driver = open(dir.path());

    driver.set(&ctx("a"), "k", Value::Int(1)).unwrap();
    driver.set(&ctx("a.b"), "k", Value::Int(2)).unwrap();
    driver.set(&ctx("a.b.c"), "k", Value::Int(3)).unwrap();
    driver.set(&ctx("d"), "k", Value::Int(4)).unwrap();

    driver.clear_all(&ctx("a")).unwrap();

    assert_eq!(driver.get(&ctx("a"), "k"), None);
    assert_eq!(driver.get(&ctx("a.b"), "k"), None);
    assert_eq!(driver.get(&ctx("a.b.c"), "k"), None);
    assert_eq!(driver.get(&ctx("d"), "k"), Some(Value::Int(4)));
    assert_eq!(driver.contexts(&ContextPath::root()), vec!["d"]);
}

#[test]
fn rotation_after_size_threshold() {
    init_logging();
    let dir = tempdir().unwrap();

    // Measure one commit line, then size the threshold so the third commit
    // forces a rotation.
    let line_len = {
        let probe_dir = tempdir().unwrap();
        let driver = open(probe_dir.path());
        driver.set(&ctx("ctx"), "k", Value::Int(0)).unwrap();
        driver.close().unwrap();
        std::fs::metadata(probe_dir.path().join("wal").join(segment_filename(1)))
            .unwrap()
            .len()
    };

    let config = DriverConfig {
        wal: WalConfig::new().with_max_segment_size(2 * line_len),
        ..DriverConfig::for_testing()
    };
    let driver = WalDriver::open(dir.path(), config).unwrap();

    driver.set(&ctx("ctx"), "k", Value::Int(1)).unwrap();
    driver.set(&ctx("ctx"), "k", Value::Int(2)).unwrap();
    let third = driver.set(&ctx("ctx"), "k", Value::Int(3)).unwrap();

    assert_eq!(third, CommitId::new(2, 0));
    let wal = dir.path().join("wal");
    assert_eq!(segment_lines(&wal.join(segment_filename(1))).len(), 2);
    assert_eq!(segment_lines(&wal.join(segment_filename(2))).len(), 1);
}

#[test]
fn replay_after_snapshot_reads_only_the_suffix() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let driver = open(dir.path());
        for i in 1..=5 {
            driver.set(&ctx("ctx"), &format!("k{}", i), Value::Int(i)).unwrap();
        }
        assert!(driver.take_snapshot().unwrap());

        driver.set(&ctx("ctx"), "k6", Value::Int(6)).unwrap();
        driver.close().unwrap();
    }

    // The persisted snapshot stops at the fifth commit
    let snapshot = SnapshotStore::primary(dir.path().to_path_buf(), true)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.commit_id, Some(CommitId::new(1, 4)));
    assert!(!snapshot.data["ctx"].contains_key("k6"));

    // Reopen: cache equals the cumulative state through commit 6
    let driver = open(dir.path());
    assert_eq!(driver.last_commit_id(), Some(CommitId::new(1, 5)));
    for i in 1..=6 {
        assert_eq!(
            driver.get(&ctx("ctx"), &format!("k{}", i)),
            Some(Value::Int(i)),
            "k{}",
            i
        );
    }
}

#[test]
fn compaction_preserves_state() {
    init_logging();
    let dir = tempdir().unwrap();
    let wal = dir.path().join("wal");

    // Small segments so commits spread over several files
    let line_len = {
        let probe_dir = tempdir().unwrap();
        let driver = open(probe_dir.path());
        driver.set(&ctx("ctx"), "k0", Value::Int(0)).unwrap();
        driver.close().unwrap();
        std::fs::metadata(probe_dir.path().join("wal").join(segment_filename(1)))
            .unwrap()
            .len()
    };
    let config = DriverConfig {
        wal: WalConfig::new().with_max_segment_size(2 * line_len),
        ..DriverConfig::for_testing()
    };

    let before;
    {
        let driver = WalDriver::open(dir.path(), config.clone()).unwrap();
        for i in 0..5 {
            driver.set(&ctx("ctx"), &format!("k{}", i), Value::Int(i)).unwrap();
        }
        // Commits: segment 1 → offsets 0,1; segment 2 → 0,1; segment 3 → 0
        assert_eq!(driver.last_commit_id(), Some(CommitId::new(3, 0)));
        assert!(wal.join(segment_filename(1)).exists());
        assert!(wal.join(segment_filename(2)).exists());

        // The snapshot enqueues a cleanup pass; drain so it has pruned the
        // covered segments before the assertions below
        assert!(driver.take_snapshot().unwrap());
        driver.drain_maintenance();

        before = driver.values(&ctx("ctx"));
        driver.close().unwrap();
    }

    // Segments 1 and 2 are gone; the head snapshot absorbed them
    assert!(!wal.join(segment_filename(1)).exists());
    assert!(!wal.join(segment_filename(2)).exists());
    assert!(wal.join(segment_filename(3)).exists());
    let head = SnapshotStore::head(dir.path().to_path_buf(), true)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(head.commit_id, Some(CommitId::new(2, 1)));

    // Reopen reproduces the same cache
    let driver = WalDriver::open(dir.path(), config).unwrap();
    assert_eq!(driver.values(&ctx("ctx")), before);
}

#[test]
fn corrupt_trailing_line_is_skipped() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let driver = open(dir.path());
        driver.set(&ctx("ctx"), "a", Value::Int(1)).unwrap();
        driver.close().unwrap();
    }

    // Simulate a crash mid-append: garbage after the valid line
    let segment = dir.path().join("wal").join(segment_filename(1));
    let mut content = std::fs::read(&segment).unwrap();
    content.extend_from_slice(b"NOT VALID JSON{{{\n");
    std::fs::write(&segment, content).unwrap();

    let driver = open(dir.path());
    assert_eq!(driver.get(&ctx("ctx"), "a"), Some(Value::Int(1)));
    assert_eq!(driver.last_commit_id(), Some(CommitId::new(1, 0)));

    // The corrupt line still occupies offset 1, so the next commit gets
    // offset 2
    let id = driver.set(&ctx("ctx"), "b", Value::Int(2)).unwrap();
    assert_eq!(id, CommitId::new(1, 2));
}

#[test]
fn durability_across_reopen() {
    init_logging();
    let dir = tempdir().unwrap();

    let mut committed = Vec::new();
    {
        let driver = open(dir.path());
        for i in 0..20 {
            let id = driver
                .set(&ctx("log"), &format!("entry{}", i), Value::Int(i))
                .unwrap();
            committed.push(id);
        }
        // Dropped without close: every resolved commit was already fsynced
    }

    let driver = open(dir.path());
    for i in 0..20 {
        assert_eq!(
            driver.get(&ctx("log"), &format!("entry{}", i)),
            Some(Value::Int(i))
        );
    }
    assert_eq!(driver.last_commit_id(), committed.last().copied());
}

#[test]
fn commit_ids_are_strictly_increasing() {
    init_logging();
    let dir = tempdir().unwrap();
    let driver = open(dir.path());

    let mut previous: Option<CommitId> = None;
    for i in 0..10 {
        let id = driver.set(&ctx("a"), "k", Value::Int(i)).unwrap();
        if let Some(prev) = previous {
            assert!(prev < id);
        }
        previous = Some(id);
    }
}

#[test]
fn rollback_leaves_no_trace() {
    init_logging();
    let dir = tempdir().unwrap();

    {
        let driver = open(dir.path());
        driver.set(&ctx("a"), "kept", Value::Int(1)).unwrap();

        {
            let mut txn = driver.begin();
            txn.set(&ctx("a"), "discarded", Value::Int(2)).unwrap();
            txn.rollback();
        }
        driver.close().unwrap();
    }

    // One line on disk, one key in the reopened cache
    let lines = segment_lines(&dir.path().join("wal").join(segment_filename(1)));
    assert_eq!(lines.len(), 1);

    let driver = open(dir.path());
    assert_eq!(driver.keys(&ctx("a")), vec!["kept"]);
}

#[test]
fn head_snapshot_wins_when_newer_than_primary() {
    init_logging();
    let dir = tempdir().unwrap();

    let line_len = {
        let probe_dir = tempdir().unwrap();
        let driver = open(probe_dir.path());
        driver.set(&ctx("ctx"), "k0", Value::Int(0)).unwrap();
        driver.close().unwrap();
        std::fs::metadata(probe_dir.path().join("wal").join(segment_filename(1)))
            .unwrap()
            .len()
    };
    let config = DriverConfig {
        wal: WalConfig::new().with_max_segment_size(line_len),
        ..DriverConfig::for_testing()
    };

    {
        let driver = WalDriver::open(dir.path(), config.clone()).unwrap();
        // One commit per segment
        for i in 0..4 {
            driver.set(&ctx("ctx"), &format!("k{}", i), Value::Int(i)).unwrap();
        }
        // Snapshot, then let the enqueued cleanup build the head snapshot
        // and prune segments 1-3
        assert!(driver.take_snapshot().unwrap());
        driver.drain_maintenance();
        driver.close().unwrap();
    }

    // Overwrite the primary snapshot with an older, partial one so the head
    // snapshot is the newer source
    let primary = SnapshotStore::primary(dir.path().to_path_buf(), true);
    let mut stale = primary.load().unwrap().unwrap();
    stale.commit_id = Some(CommitId::new(1, 0));
    stale.data.clear();
    primary.save(&stale).unwrap();

    let head = SnapshotStore::head(dir.path().to_path_buf(), true)
        .load()
        .unwrap()
        .unwrap();
    assert!(head.commit_id > stale.commit_id);

    // Hydration picks the head snapshot and replays the rest of the WAL
    let driver = WalDriver::open(dir.path(), config).unwrap();
    for i in 0..4 {
        assert_eq!(
            driver.get(&ctx("ctx"), &format!("k{}", i)),
            Some(Value::Int(i))
        );
    }
}

#[test]
fn closed_segments_can_be_recompressed_and_still_replay() {
    init_logging();
    let dir = tempdir().unwrap();
    let wal = dir.path().join("wal");

    {
        let driver = open(dir.path());
        for i in 0..6 {
            driver.set(&ctx("ctx"), &format!("k{}", i), Value::Int(i)).unwrap();
        }
        driver.close().unwrap();
    }

    hearth_durability::codec::recompress_segment(&wal, 1).unwrap();
    assert!(!wal.join(segment_filename(1)).exists());
    assert!(wal.join(compressed_segment_filename(1)).exists());

    // Replay reads through the compressed segment; the writer starts a new
    // one rather than appending to it
    let driver = open(dir.path());
    for i in 0..6 {
        assert_eq!(
            driver.get(&ctx("ctx"), &format!("k{}", i)),
            Some(Value::Int(i))
        );
    }
    let id = driver.set(&ctx("ctx"), "k6", Value::Int(6)).unwrap();
    assert_eq!(id.segment, 2);
}

#[test]
fn values_survive_serialization_extremes() {
    init_logging();
    let dir = tempdir().unwrap();

    let blob = Value::Bytes(vec![0u8, 1, 2, 253, 254, 255]);
    let big = Value::BigInt(170_141_183_460_469_231_731_687_303_715_884_105_727i128);
    let nested = Value::Array(vec![
        Value::Null,
        Value::Object(std::collections::BTreeMap::from([(
            "inner".to_string(),
            Value::Float(-2.5),
        )])),
    ]);

    {
        let driver = open(dir.path());
        driver.set(&ctx("vals"), "blob", blob.clone()).unwrap();
        driver.set(&ctx("vals"), "big", big.clone()).unwrap();
        driver.set(&ctx("vals"), "nested", nested.clone()).unwrap();
        driver.close().unwrap();
    }

    let driver = open(dir.path());
    assert_eq!(driver.get(&ctx("vals"), "blob"), Some(blob));
    assert_eq!(driver.get(&ctx("vals"), "big"), Some(big));
    assert_eq!(driver.get(&ctx("vals"), "nested"), Some(nested));
}
