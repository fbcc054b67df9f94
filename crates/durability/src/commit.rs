//! Commit codec
//!
//! Pure functions over commits, commit ids, and segment names. A commit is
//! one line of extended JSON: `{"ts":<ms>,"ops":[...]}`. Each op is
//! `{"op":"upd","key":"<ctx>","values":{...}}` or
//! `{"op":"del","key":"<ctx>"}` (optionally with `"values":["k",...]`).
//! Context keys use the slash-joined wire form; the in-memory store uses
//! dot-joined keys (see `hearth_core::context`).
//!
//! On decode, a legacy bare array `[<op>,...]` is accepted as
//! `{ts: 0, ops}`. Writes always produce the `{ts, ops}` form.

use hearth_core::context::{ContextPath, ContextPathError};
use hearth_core::json::{value_from_json, value_to_json, JsonError};
use hearth_core::store::{Commit, ContextEntries, Op};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::fmt;
use thiserror::Error;

/// A 48-bit logical commit identifier: segment number plus line index.
///
/// Total order is lexicographic on `(segment, offset)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CommitId {
    /// Segment number (starting at 1)
    pub segment: u32,
    /// Line index within the segment (starting at 0)
    pub offset: u16,
}

impl CommitId {
    /// Build a commit id.
    pub fn new(segment: u32, offset: u16) -> Self {
        CommitId { segment, offset }
    }

    /// Collapse into a single 48-bit-safe integer:
    /// `segment * 0x10000 + offset`.
    pub fn as_u64(&self) -> u64 {
        (self.segment as u64) * 0x10000 + self.offset as u64
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

/// Errors raised when decoding a commit line.
#[derive(Debug, Error)]
pub enum CommitDecodeError {
    /// The line was not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value payload failed extended-JSON decoding.
    #[error("invalid value: {0}")]
    Value(#[from] JsonError),

    /// An op's context key failed to parse.
    #[error("invalid context key: {0}")]
    Context(#[from] ContextPathError),

    /// The op discriminator was missing or unknown.
    #[error("unknown op: {0}")]
    UnknownOp(String),

    /// The line or an op did not have the expected shape.
    #[error("malformed commit line: {0}")]
    Malformed(&'static str),
}

/// Encode a commit as a single line (without the trailing newline).
pub fn encode_line(commit: &Commit) -> Result<String, JsonError> {
    let ops = commit
        .ops
        .iter()
        .map(encode_op)
        .collect::<Result<Vec<_>, _>>()?;
    let line = json!({ "ts": commit.ts, "ops": ops });
    // Serializing a tree we just built cannot fail
    Ok(line.to_string())
}

fn encode_op(op: &Op) -> Result<serde_json::Value, JsonError> {
    Ok(match op {
        Op::Set { context, values } => {
            let mut obj = Map::with_capacity(values.len());
            for (k, v) in values {
                obj.insert(k.clone(), value_to_json(v)?);
            }
            json!({ "op": "upd", "key": context.wire_key(), "values": obj })
        }
        Op::Delete {
            context,
            keys: None,
        } => json!({ "op": "del", "key": context.wire_key() }),
        Op::Delete {
            context,
            keys: Some(keys),
        } => json!({ "op": "del", "key": context.wire_key(), "values": keys }),
    })
}

/// Decode one commit line.
pub fn decode_line(line: &str) -> Result<Commit, CommitDecodeError> {
    let parsed: serde_json::Value = serde_json::from_str(line)?;

    let (ts, ops_json) = match &parsed {
        // Legacy form: a bare array of ops
        serde_json::Value::Array(ops) => (0, ops),
        serde_json::Value::Object(obj) => {
            let ts = obj.get("ts").and_then(|v| v.as_u64()).unwrap_or(0);
            let ops = obj
                .get("ops")
                .and_then(|v| v.as_array())
                .ok_or(CommitDecodeError::Malformed("missing ops array"))?;
            (ts, ops)
        }
        _ => return Err(CommitDecodeError::Malformed("not an object or array")),
    };

    let ops = ops_json
        .iter()
        .map(decode_op)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Commit { ts, ops })
}

fn decode_op(op: &serde_json::Value) -> Result<Op, CommitDecodeError> {
    let obj = op
        .as_object()
        .ok_or(CommitDecodeError::Malformed("op is not an object"))?;
    let kind = obj
        .get("op")
        .and_then(|v| v.as_str())
        .ok_or(CommitDecodeError::Malformed("missing op discriminator"))?;
    let key = obj
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or(CommitDecodeError::Malformed("missing op key"))?;
    let context = ContextPath::parse_wire_key(key)?;

    match kind {
        "upd" => {
            let values = obj
                .get("values")
                .and_then(|v| v.as_object())
                .ok_or(CommitDecodeError::Malformed("upd without values object"))?;
            let mut entries = ContextEntries::new();
            for (k, v) in values {
                entries.insert(k.clone(), value_from_json(v)?);
            }
            Ok(Op::Set {
                context,
                values: entries,
            })
        }
        "del" => {
            let keys = match obj.get("values") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::Array(items)) => {
                    let mut keys = Vec::with_capacity(items.len());
                    for item in items {
                        keys.push(
                            item.as_str()
                                .ok_or(CommitDecodeError::Malformed(
                                    "del values must be strings",
                                ))?
                                .to_string(),
                        );
                    }
                    Some(keys)
                }
                Some(_) => {
                    return Err(CommitDecodeError::Malformed("del values must be an array"))
                }
            };
            Ok(Op::Delete { context, keys })
        }
        other => Err(CommitDecodeError::UnknownOp(other.to_string())),
    }
}

/// Parsed form of a segment filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFileName {
    /// Segment number
    pub number: u32,
    /// Whether the file carries the `.gz` suffix
    pub compressed: bool,
}

/// Filename of an uncompressed segment: 8 hex digits plus `.jsonl`.
pub fn segment_filename(number: u32) -> String {
    format!("{:08x}.jsonl", number)
}

/// Filename of a compressed segment.
pub fn compressed_segment_filename(number: u32) -> String {
    format!("{:08x}.jsonl.gz", number)
}

/// Parse a directory entry name as a segment filename.
///
/// Accepts both plain and `.gz` forms; anything else is not a segment.
pub fn parse_segment_filename(name: &str) -> Option<SegmentFileName> {
    let (stem, compressed) = match name.strip_suffix(".jsonl.gz") {
        Some(stem) => (stem, true),
        None => (name.strip_suffix(".jsonl")?, false),
    };
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let number = u32::from_str_radix(stem, 16).ok()?;
    Some(SegmentFileName { number, compressed })
}
