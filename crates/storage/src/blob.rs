//! Blob storage
//!
//! Large byte buffers live outside the WAL, one file per blob under the
//! `blobs/` subdirectory. The path derives from the context (one directory
//! level per segment) and the blob key; both are percent-escaped so they
//! are always valid, traversal-free file names. Blob files carry a `.blob`
//! suffix so they can never collide with child-context directories.

use hearth_core::context::{decode_wire_segment, encode_wire_segment, ContextPath};
use hearth_core::error::Result;
use std::io;
use std::path::PathBuf;

const BLOB_SUFFIX: &str = ".blob";

/// File-per-blob store rooted at `<storage dir>/blobs`.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Create a blob store under the given storage directory.
    pub fn new(storage_dir: &std::path::Path) -> Self {
        BlobStore {
            dir: storage_dir.join("blobs"),
        }
    }

    fn context_dir(&self, context: &ContextPath) -> PathBuf {
        let mut dir = self.dir.clone();
        for segment in context.segments() {
            dir.push(encode_wire_segment(segment));
        }
        dir
    }

    fn blob_path(&self, context: &ContextPath, key: &str) -> PathBuf {
        self.context_dir(context)
            .join(format!("{}{}", encode_wire_segment(key), BLOB_SUFFIX))
    }

    /// Write (replace) a blob.
    pub fn write(&self, context: &ContextPath, key: &str, data: &[u8]) -> Result<()> {
        let path = self.blob_path(context, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)?;
        Ok(())
    }

    /// Read a blob; `None` when it does not exist.
    pub fn read(&self, context: &ContextPath, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.blob_path(context, key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob. Returns whether one existed.
    pub fn delete(&self, context: &ContextPath, key: &str) -> Result<bool> {
        match std::fs::remove_file(self.blob_path(context, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of the blobs stored directly in a context, sorted.
    pub fn keys(&self, context: &ContextPath) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(self.context_dir(context)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(BLOB_SUFFIX) {
                keys.push(decode_wire_segment(stem));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
