//! Driver kinds and the engine-variant seam
//!
//! A storage directory carries a one-line `driver.json` marker,
//! `{"kind":"wal", ...}`, written by the driver-selection layer above this
//! crate. The WAL driver only validates it: opening a directory claimed by
//! a different engine is refused rather than corrupted.
//!
//! [`StorageDriver`] is the surface the selection layer programs against;
//! each engine variant implements it, and only the WAL variant lives in
//! this crate.

use hearth_core::context::ContextPath;
use hearth_core::error::{Error, Result};
use hearth_core::store::ContextEntries;
use hearth_core::value::Value;
use std::io;
use std::path::Path;

/// Filename of the driver marker.
pub const DRIVER_MARKER_FILENAME: &str = "driver.json";

/// Which engine owns a storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// This engine: segmented WAL plus snapshots.
    Wal,
    /// Flat-file engine (selection layer only; not implemented here).
    File,
    /// SQLite-backed engine (selection layer only; not implemented here).
    Sqlite,
}

impl DriverKind {
    /// The marker string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Wal => "wal",
            DriverKind::File => "file",
            DriverKind::Sqlite => "sqlite",
        }
    }

    /// Parse a marker string.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "wal" => Some(DriverKind::Wal),
            "file" => Some(DriverKind::File),
            "sqlite" => Some(DriverKind::Sqlite),
            _ => None,
        }
    }
}

/// The key-value and blob surface shared by every engine variant.
///
/// Object safe, so the selection layer can hand callers a
/// `&dyn StorageDriver` picked by the directory's marker. Mutators return
/// no commit id; that is a WAL-variant detail available on the concrete
/// [`WalDriver`](crate::driver::WalDriver) API. Reads return absence as
/// `None`/empty, never as an error.
pub trait StorageDriver: Send + Sync {
    /// Which engine serves this driver.
    fn kind(&self) -> DriverKind;

    /// Look up one value.
    fn get(&self, context: &ContextPath, key: &str) -> Option<Value>;

    /// Keys of a context, sorted.
    fn keys(&self, context: &ContextPath) -> Vec<String>;

    /// A copy of a context's entries.
    fn values(&self, context: &ContextPath) -> ContextEntries;

    /// Names of the immediate child contexts.
    fn contexts(&self, context: &ContextPath) -> Vec<String>;

    /// Set one value.
    fn set(&self, context: &ContextPath, key: &str, value: Value) -> Result<()>;

    /// Merge several values into a context at once.
    fn set_values(&self, context: &ContextPath, values: ContextEntries) -> Result<()>;

    /// Delete one key from a context.
    fn delete(&self, context: &ContextPath, key: &str) -> Result<()>;

    /// Delete a context's own entries and its entire subtree.
    fn clear_all(&self, context: &ContextPath) -> Result<()>;

    /// Write (replace) a blob.
    fn write_blob(&self, context: &ContextPath, key: &str, data: &[u8]) -> Result<()>;

    /// Read a blob; `None` when it does not exist.
    fn read_blob(&self, context: &ContextPath, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a blob. Returns whether one existed.
    fn delete_blob(&self, context: &ContextPath, key: &str) -> Result<bool>;
}

/// Read the marker of a storage directory, if one exists.
pub fn read_marker(storage_dir: &Path) -> Result<Option<DriverKind>> {
    let path = storage_dir.join(DRIVER_MARKER_FILENAME);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let doc: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;
    let kind = doc
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::corruption(format!("{}: missing kind", path.display())))?;

    DriverKind::parse(kind)
        .map(Some)
        .ok_or_else(|| Error::storage(format!("unknown driver kind: {}", kind)))
}

/// Refuse to open a directory whose marker names a different engine.
/// A missing marker is fine; the selection layer owns writing it.
pub fn verify_wal_marker(storage_dir: &Path) -> Result<()> {
    match read_marker(storage_dir)? {
        None | Some(DriverKind::Wal) => Ok(()),
        Some(other) => Err(Error::storage(format!(
            "directory is owned by the {} driver",
            other.as_str()
        ))),
    }
}
