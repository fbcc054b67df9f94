//! Gzip codec for segments and snapshots
//!
//! Closed WAL segments and snapshot files may be stored gzip-compressed
//! (`.gz` suffix). The active segment is always plain so the writer can
//! append and the reader can count lines cheaply.

use crate::commit::{compressed_segment_filename, segment_filename};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Gzip-compress a buffer.
pub fn gzip_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a gzip buffer fully into memory.
pub fn gzip_decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Rewrite a closed, uncompressed segment as its `.gz` variant.
///
/// Writes `NNNNNNNN.jsonl.gz.tmp`, fsyncs, renames over the final name and
/// removes the plain file. Returns `false` without touching anything when
/// the plain file does not exist (already compressed or already pruned).
///
/// The caller must never pass the active segment.
pub fn recompress_segment(wal_dir: &Path, segment: u32) -> io::Result<bool> {
    let plain = wal_dir.join(segment_filename(segment));
    let data = match std::fs::read(&plain) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let compressed = gzip_compress(&data)?;
    let final_path = wal_dir.join(compressed_segment_filename(segment));
    let tmp_path = wal_dir.join(format!("{}.tmp", compressed_segment_filename(segment)));

    let mut file = File::create(&tmp_path)?;
    file.write_all(&compressed)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, &final_path)?;
    std::fs::remove_file(&plain)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_compress_roundtrip() {
        let data = b"line one\nline two\n".repeat(100);
        let compressed = gzip_compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(gzip_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_empty_roundtrip() {
        let compressed = gzip_compress(b"").unwrap();
        assert_eq!(gzip_decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_recompress_segment() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join(segment_filename(3));
        std::fs::write(&plain, b"{\"ts\":1,\"ops\":[]}\n").unwrap();

        assert!(recompress_segment(dir.path(), 3).unwrap());
        assert!(!plain.exists());

        let gz = dir.path().join(compressed_segment_filename(3));
        let content = gzip_decompress(&std::fs::read(&gz).unwrap()).unwrap();
        assert_eq!(content, b"{\"ts\":1,\"ops\":[]}\n");

        // Second pass finds nothing to do
        assert!(!recompress_segment(dir.path(), 3).unwrap());
        assert!(gz.exists());
    }
}
