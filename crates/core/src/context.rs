//! Context paths
//!
//! A context is a node in the store's tree, addressed by an ordered list of
//! non-empty segments. Two encodings exist:
//!
//! - **storage form**: segments joined with `.`, the key of the in-memory
//!   store and snapshot data (the root context is the empty string). At the
//!   public API layer no segment may contain `.`, so the joined form is
//!   unambiguous.
//! - **wire form**: segments joined with `/`, with `%` and `/` percent-
//!   encoded inside each segment. This is the form that appears in WAL
//!   lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation and parse errors for context paths and keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextPathError {
    /// A path segment was empty.
    #[error("context segment must not be empty")]
    EmptySegment,

    /// A path segment contained the `.` separator.
    #[error("context segment must not contain '.': {0}")]
    DottedSegment(String),
}

/// An ordered list of context segments addressing a node in the store tree.
///
/// The root context is the empty path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextPath(Vec<String>);

impl ContextPath {
    /// The root context (empty path).
    pub fn root() -> Self {
        ContextPath(Vec::new())
    }

    /// Build a path from segments, validating each one.
    pub fn new<I, S>(segments: I) -> Result<Self, ContextPathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for seg in segments {
            let seg = seg.into();
            validate_segment(&seg)?;
            out.push(seg);
        }
        Ok(ContextPath(out))
    }

    /// The path's segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether this is the root context.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments (same as [`is_root`](Self::is_root)).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The child path obtained by appending one segment.
    pub fn child(&self, segment: &str) -> Result<Self, ContextPathError> {
        validate_segment(segment)?;
        let mut segs = self.0.clone();
        segs.push(segment.to_string());
        Ok(ContextPath(segs))
    }

    /// The parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(ContextPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Whether `self` equals `other` or is a descendant of it.
    pub fn starts_with(&self, other: &ContextPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// Dot-joined storage key (root → `""`).
    pub fn storage_key(&self) -> String {
        self.0.join(".")
    }

    /// Parse a dot-joined storage key back into a path.
    pub fn parse_storage_key(key: &str) -> Result<Self, ContextPathError> {
        if key.is_empty() {
            return Ok(ContextPath::root());
        }
        ContextPath::new(key.split('.'))
    }

    /// Slash-joined wire key with `%` → `%25` and `/` → `%2F` inside each
    /// segment (root → `""`).
    pub fn wire_key(&self) -> String {
        self.0
            .iter()
            .map(|s| encode_wire_segment(s))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Parse a wire key back into a path.
    pub fn parse_wire_key(key: &str) -> Result<Self, ContextPathError> {
        if key.is_empty() {
            return Ok(ContextPath::root());
        }
        let mut segments = Vec::new();
        for part in key.split('/') {
            if part.is_empty() {
                return Err(ContextPathError::EmptySegment);
            }
            segments.push(decode_wire_segment(part));
        }
        Ok(ContextPath(segments))
    }
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_key())
    }
}

fn validate_segment(segment: &str) -> Result<(), ContextPathError> {
    if segment.is_empty() {
        return Err(ContextPathError::EmptySegment);
    }
    if segment.contains('.') {
        return Err(ContextPathError::DottedSegment(segment.to_string()));
    }
    Ok(())
}

/// Validate a context key (non-empty, no `.`). Keys share the segment rules.
pub fn validate_key(key: &str) -> Result<(), ContextPathError> {
    validate_segment(key)
}

/// Percent-encode one segment for the wire form (`%` → `%25`, `/` → `%2F`).
///
/// Also used for deriving filesystem names from keys (blob paths).
pub fn encode_wire_segment(segment: &str) -> String {
    // '%' first so the escape character itself round-trips
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Reverse [`encode_wire_segment`].
pub fn decode_wire_segment(segment: &str) -> String {
    segment.replace("%2F", "/").replace("%25", "%")
}
