//! WAL writer configuration.

/// WAL writer parameters.
///
/// The line-count cap per segment is fixed at
/// [`MAX_SEGMENT_LINES`](super::MAX_SEGMENT_LINES) because offsets are
/// 16-bit; only the byte threshold and fsync policy are configurable.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Maximum segment size in bytes (default: 16 MiB).
    ///
    /// The writer rotates to a new segment before a write when the current
    /// segment has reached this size.
    pub max_segment_size: u64,

    /// Whether to fsync after every appended commit (default: true).
    pub fsync_each_commit: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            max_segment_size: 16 * 1024 * 1024, // 16 MiB
            fsync_each_commit: true,
        }
    }
}

impl WalConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment size threshold (builder pattern).
    pub fn with_max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = bytes;
        self
    }

    /// Set the fsync policy (builder pattern).
    pub fn with_fsync_each_commit(mut self, fsync: bool) -> Self {
        self.fsync_each_commit = fsync;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.max_segment_size < 1024 {
            return Err(WalConfigError::SegmentSizeTooSmall);
        }
        Ok(())
    }

    /// A configuration sized for tests (small segments, fast rotation).
    pub fn for_testing() -> Self {
        WalConfig {
            max_segment_size: 4 * 1024,
            fsync_each_commit: true,
        }
    }
}

/// WAL configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    /// Segment size is below the 1 KiB minimum.
    #[error("segment size must be at least 1KiB")]
    SegmentSizeTooSmall,
}
