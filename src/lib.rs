//! # hearth
//!
//! Crash-safe WAL storage engine for a smart-home controller stack: a
//! transactional, hierarchical key-value store backed by an append-only
//! segmented log, periodic snapshots, and a compactor. Reads are served
//! synchronously from an in-memory cache that mirrors the durable state.
//!
//! # Quick Start
//!
//! ```no_run
//! use hearth::{ContextPath, DriverConfig, Value, WalDriver};
//!
//! fn main() -> hearth::Result<()> {
//!     let driver = WalDriver::open("./node-storage", DriverConfig::default())?;
//!     let lamp = ContextPath::new(["devices", "lamp"])?;
//!
//!     // Direct calls are single-op transactions
//!     driver.set(&lamp, "on", Value::Bool(true))?;
//!     assert_eq!(driver.get(&lamp, "on"), Some(Value::Bool(true)));
//!
//!     // Multi-op transactions buffer until commit and read their own writes
//!     let mut txn = driver.begin();
//!     txn.set(&lamp, "level", Value::Int(80))?;
//!     txn.delete(&lamp, "on")?;
//!     txn.commit()?;
//!     drop(txn);
//!
//!     driver.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/driver.json          engine marker (written by the selection layer)
//! <dir>/snapshot.json.gz     primary snapshot
//! <dir>/head.json.gz         head snapshot maintained by the compactor
//! <dir>/wal/NNNNNNNN.jsonl   WAL segments (possibly .gz once closed)
//! <dir>/blobs/...            out-of-WAL blobs
//! ```

pub use hearth_core::{
    from_json, now_millis, to_json, to_json_pretty, Commit, ContextEntries, ContextPath,
    ContextPathError, Error, JsonError, Op, Result, StoreData, Value,
};
pub use hearth_durability::{
    AppendOutcome, CommitId, CompactionOutcome, Compactor, Snapshot, SnapshotStore, WalConfig,
    WalReader, WalWriter,
};
pub use hearth_storage::{DriverConfig, DriverKind, StorageDriver, Transaction, WalDriver};
