//! Durability layer for hearth
//!
//! This crate handles everything that touches disk:
//!
//! - Commit codec: one extended-JSON line per commit, commit-id ordering,
//!   segment filename parsing
//! - WAL: segmented append-only log with size and line-count rotation
//! - Gzip codec for closed segments and snapshot files
//! - Snapshots: atomic save/load of the materialized store
//! - Compaction: pruning segments fully captured by a snapshot, absorbing
//!   their commits into a head snapshot first

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod commit;
pub mod compaction;
pub mod snapshot;
pub mod wal;

pub use commit::{
    compressed_segment_filename, parse_segment_filename, segment_filename, CommitDecodeError,
    CommitId, SegmentFileName,
};
pub use compaction::{CompactionOutcome, Compactor};
pub use snapshot::{Snapshot, SnapshotStore, HEAD_BASENAME, PRIMARY_BASENAME};
pub use wal::{
    config::WalConfig, reader::WalReader, writer::AppendOutcome, writer::WalWriter,
    MAX_SEGMENT_LINES,
};
