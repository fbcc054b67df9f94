//! Snapshots
//!
//! A snapshot is the store materialized through one commit id, saved as a
//! pretty-printed extended-JSON file:
//!
//! ```json
//! {"commitId":{"segment":1,"offset":4},"ts":1700000000000,"data":{...}}
//! ```
//!
//! Two named snapshots live in a storage directory: the primary
//! (`snapshot.json[.gz]`) and the head snapshot (`head.json[.gz]`) the
//! compactor maintains. Saves are atomic: temp file, fsync, rename, fsync
//! of the directory. Loads pick the fresher of the plain/compressed forms.

use crate::codec::{gzip_compress, gzip_decompress};
use crate::commit::CommitId;
use hearth_core::context::ContextPath;
use hearth_core::error::{Error, Result};
use hearth_core::json::{value_from_json, value_to_json};
use hearth_core::store::{
    child_contexts, context_keys, context_values, get_value, ContextEntries, StoreData,
};
use hearth_core::value::Value;
use serde_json::{json, Map};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Basename of the primary snapshot.
pub const PRIMARY_BASENAME: &str = "snapshot";

/// Basename of the compaction-produced head snapshot.
pub const HEAD_BASENAME: &str = "head";

/// A materialized view of the store at one commit id.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The last commit captured, `None` for a snapshot of nothing.
    pub commit_id: Option<CommitId>,
    /// Wall-clock milliseconds when the snapshot was produced.
    pub ts: u64,
    /// The materialized store.
    pub data: StoreData,
}

impl Snapshot {
    /// A snapshot of nothing: no commit id, empty store.
    pub fn empty() -> Self {
        Snapshot {
            commit_id: None,
            ts: 0,
            data: StoreData::new(),
        }
    }

    /// Look up one value.
    pub fn get(&self, context: &ContextPath, key: &str) -> Option<&Value> {
        get_value(&self.data, context, key)
    }

    /// Keys of a context, sorted.
    pub fn keys(&self, context: &ContextPath) -> Vec<String> {
        context_keys(&self.data, context)
    }

    /// A copy of a context's entries.
    pub fn values(&self, context: &ContextPath) -> ContextEntries {
        context_values(&self.data, context)
    }

    /// Names of the immediate child contexts.
    pub fn contexts(&self, context: &ContextPath) -> Vec<String> {
        child_contexts(&self.data, context)
    }
}

/// Persistence for one named snapshot in a storage directory.
pub struct SnapshotStore {
    dir: PathBuf,
    basename: &'static str,
    compress: bool,
}

impl SnapshotStore {
    /// Create a store for the given basename.
    pub fn new(dir: PathBuf, basename: &'static str, compress: bool) -> Self {
        SnapshotStore {
            dir,
            basename,
            compress,
        }
    }

    /// Store for the primary snapshot.
    pub fn primary(dir: PathBuf, compress: bool) -> Self {
        Self::new(dir, PRIMARY_BASENAME, compress)
    }

    /// Store for the head snapshot.
    pub fn head(dir: PathBuf, compress: bool) -> Self {
        Self::new(dir, HEAD_BASENAME, compress)
    }

    fn plain_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.basename))
    }

    fn compressed_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.gz", self.basename))
    }

    /// Save atomically: write `basename.tmp.json[.gz]`, fsync, rename to
    /// the final name, fsync the directory. When the configured compression
    /// differs from a previously saved file's, the old-format file is
    /// deleted after the rename so only one form remains.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let text = encode_snapshot(snapshot)?;
        let (bytes, final_path, tmp_path, stale_path) = if self.compress {
            (
                gzip_compress(text.as_bytes())?,
                self.compressed_path(),
                self.dir.join(format!("{}.tmp.json.gz", self.basename)),
                self.plain_path(),
            )
        } else {
            (
                text.into_bytes(),
                self.plain_path(),
                self.dir.join(format!("{}.tmp.json", self.basename)),
                self.compressed_path(),
            )
        };

        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &final_path)?;
        File::open(&self.dir)?.sync_all()?;

        match std::fs::remove_file(&stale_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(
            target: "hearth::snapshot",
            basename = self.basename,
            commit_id = ?snapshot.commit_id,
            contexts = snapshot.data.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load the snapshot, auto-detecting the on-disk form. When both forms
    /// exist the one with the greater modification time wins; ties go to
    /// the compressed form. Missing files yield `None`.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let plain = self.plain_path();
        let compressed = self.compressed_path();

        let pick = match (mtime(&plain)?, mtime(&compressed)?) {
            (None, None) => return Ok(None),
            (Some(_), None) => (plain, false),
            (None, Some(_)) => (compressed, true),
            (Some(p), Some(c)) => {
                if p > c {
                    (plain, false)
                } else {
                    (compressed, true)
                }
            }
        };

        let bytes = std::fs::read(&pick.0)?;
        let text = if pick.1 {
            String::from_utf8_lossy(&gzip_decompress(&bytes)?).into_owned()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        let snapshot = decode_snapshot(&text)
            .map_err(|e| Error::corruption(format!("{}: {}", pick.0.display(), e)))?;
        Ok(Some(snapshot))
    }
}

fn mtime(path: &Path) -> Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn encode_snapshot(snapshot: &Snapshot) -> Result<String> {
    let commit_id = match snapshot.commit_id {
        Some(id) => json!({ "segment": id.segment, "offset": id.offset }),
        None => serde_json::Value::Null,
    };

    let mut data = Map::with_capacity(snapshot.data.len());
    for (ctx, entries) in &snapshot.data {
        let mut obj = Map::with_capacity(entries.len());
        for (k, v) in entries {
            obj.insert(k.clone(), value_to_json(v).map_err(Error::Json)?);
        }
        data.insert(ctx.clone(), serde_json::Value::Object(obj));
    }

    let doc = json!({ "commitId": commit_id, "ts": snapshot.ts, "data": data });
    serde_json::to_string_pretty(&doc).map_err(|e| Error::storage(e.to_string()))
}

fn decode_snapshot(text: &str) -> std::result::Result<Snapshot, String> {
    let doc: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let obj = doc.as_object().ok_or("snapshot is not an object")?;

    let commit_id = match obj.get("commitId") {
        None | Some(serde_json::Value::Null) => None,
        Some(id) => {
            let segment = id
                .get("segment")
                .and_then(|v| v.as_u64())
                .ok_or("commitId without segment")?;
            let offset = id
                .get("offset")
                .and_then(|v| v.as_u64())
                .ok_or("commitId without offset")?;
            Some(CommitId::new(
                u32::try_from(segment).map_err(|_| "segment out of range")?,
                u16::try_from(offset).map_err(|_| "offset out of range")?,
            ))
        }
    };

    let ts = obj.get("ts").and_then(|v| v.as_u64()).unwrap_or(0);

    let mut data = StoreData::new();
    if let Some(entries) = obj.get("data") {
        let entries = entries.as_object().ok_or("data is not an object")?;
        for (ctx, values) in entries {
            let values = values
                .as_object()
                .ok_or_else(|| format!("context {} is not an object", ctx))?;
            let mut out = ContextEntries::new();
            for (k, v) in values {
                out.insert(k.clone(), value_from_json(v).map_err(|e| e.to_string())?);
            }
            data.insert(ctx.clone(), out);
        }
    }

    Ok(Snapshot {
        commit_id,
        ts,
        data,
    })
}
