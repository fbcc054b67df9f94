//! WAL writer
//!
//! Appends commits to the current segment and rotates to a new one before
//! either the byte threshold or the line-count cap would be exceeded.
//!
//! The writer is lazy: no file is touched until the first append, at which
//! point it scans the WAL directory and resumes the highest uncompressed
//! segment when it is still below both thresholds. A compressed highest
//! segment is closed by definition, so writing continues in a fresh one.
//!
//! Callers must serialize appends; the writer holds one open handle and one
//! in-flight operation at a time.

use crate::commit::{encode_line, CommitId};
use crate::wal::config::WalConfig;
use crate::wal::{list_segment_files, segment_path, MAX_SEGMENT_LINES};
use hearth_core::error::Result;
use hearth_core::store::{Commit, Op};
use hearth_core::value::now_millis;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Result of appending one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Id assigned to the commit
    pub id: CommitId,
    /// Timestamp stamped into the commit line (ms since epoch)
    pub ts: u64,
}

/// Callback invoked with the number of a segment that was just closed by
/// rotation. Runs inline inside the append that caused the rotation.
pub type RotationCallback = Box<dyn Fn(u32) + Send + Sync>;

struct OpenSegment {
    file: File,
    segment: u32,
    /// Line index of the next write
    offset: u32,
    /// Bytes written to the segment so far
    size: u64,
}

/// Appends commits to bounded segment files.
pub struct WalWriter {
    wal_dir: PathBuf,
    config: WalConfig,
    on_rotate: Option<RotationCallback>,
    open: Option<OpenSegment>,
}

impl WalWriter {
    /// Create a writer over a WAL directory. No I/O happens until the first
    /// append.
    pub fn new(wal_dir: PathBuf, config: WalConfig) -> Self {
        WalWriter {
            wal_dir,
            config,
            on_rotate: None,
            open: None,
        }
    }

    /// Install the rotation callback (builder pattern).
    pub fn with_rotation_callback(mut self, callback: RotationCallback) -> Self {
        self.on_rotate = Some(callback);
        self
    }

    /// Append one commit: a single line, stamped with the current wall
    /// clock, optionally fsynced.
    ///
    /// Rotation happens before the write, so the returned id always refers
    /// to the segment the line actually landed in.
    pub fn append(&mut self, ops: &[Op]) -> Result<AppendOutcome> {
        self.ensure_open()?;
        self.maybe_rotate()?;

        let ts = now_millis();
        let commit = Commit {
            ts,
            ops: ops.to_vec(),
        };
        let mut line = encode_line(&commit)?;
        line.push('\n');

        let segment = self
            .open
            .as_mut()
            .expect("segment is open after ensure_open");

        // One write call per line; a partial write surfaces as an error and
        // fails the commit outright.
        segment.file.write_all(line.as_bytes())?;
        if self.config.fsync_each_commit {
            segment.file.sync_all()?;
        }

        let id = CommitId::new(segment.segment, segment.offset as u16);
        segment.offset += 1;
        segment.size += line.len() as u64;

        Ok(AppendOutcome { id, ts })
    }

    /// The segment currently open for appends, if any.
    pub fn current_segment(&self) -> Option<u32> {
        self.open.as_ref().map(|s| s.segment)
    }

    /// Flush and close the open segment handle, if any.
    pub fn close(&mut self) -> Result<()> {
        if let Some(segment) = self.open.take() {
            segment.file.sync_all()?;
        }
        Ok(())
    }

    /// Open a segment on first use: resume the highest plain segment when
    /// it is below both thresholds, otherwise start the next one.
    fn ensure_open(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.wal_dir)?;
        let segments = list_segment_files(&self.wal_dir)?;

        let open = match segments.iter().next_back() {
            None => self.open_fresh(1)?,
            Some((&highest, forms)) => {
                if forms.compressed {
                    // A compressed segment is closed; never append to it
                    self.open_fresh(highest + 1)?
                } else {
                    self.resume_or_advance(highest)?
                }
            }
        };

        debug!(
            target: "hearth::wal",
            segment = open.segment,
            offset = open.offset,
            size = open.size,
            "Opened WAL segment for appending"
        );
        self.open = Some(open);
        Ok(())
    }

    fn resume_or_advance(&self, segment: u32) -> Result<OpenSegment> {
        let path = segment_path(&self.wal_dir, segment, false);
        let bytes = std::fs::read(&path)?;
        let size = bytes.len() as u64;
        let offset = String::from_utf8_lossy(&bytes)
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .count() as u32;

        if size >= self.config.max_segment_size || offset >= MAX_SEGMENT_LINES {
            return self.open_fresh(segment + 1);
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(OpenSegment {
            file,
            segment,
            offset,
            size,
        })
    }

    fn open_fresh(&self, segment: u32) -> Result<OpenSegment> {
        let path = segment_path(&self.wal_dir, segment, false);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(OpenSegment {
            file,
            segment,
            offset: 0,
            size: 0,
        })
    }

    /// Rotate when the open segment is non-empty and a threshold has been
    /// reached. The callback fires with the closed segment's number after
    /// the new segment is in place.
    fn maybe_rotate(&mut self) -> Result<()> {
        let needs_rotation = match self.open.as_ref() {
            Some(s) => {
                s.size > 0
                    && (s.size >= self.config.max_segment_size || s.offset >= MAX_SEGMENT_LINES)
            }
            None => false,
        };
        if !needs_rotation {
            return Ok(());
        }

        let closed = self
            .open
            .take()
            .expect("rotation only considered while a segment is open");
        closed.file.sync_all()?;
        let closed_number = closed.segment;
        drop(closed);

        self.open = Some(self.open_fresh(closed_number + 1)?);
        debug!(
            target: "hearth::wal",
            closed = closed_number,
            current = closed_number + 1,
            "Rotated WAL segment"
        );

        if let Some(on_rotate) = &self.on_rotate {
            on_rotate(closed_number);
        }
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
