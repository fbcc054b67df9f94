//! Core types for the hearth storage engine
//!
//! This crate defines the foundational, I/O-free pieces shared by the
//! durability and storage layers:
//!
//! - `Value`: unified value type (null, bool, numbers, strings, bytes,
//!   big integers, arrays, objects)
//! - Extended JSON codec: lossless round-trip including bytes and big
//!   integers via tagged strings
//! - `ContextPath`: hierarchical context addressing with its two encoded
//!   forms (dot-joined storage keys, slash-joined wire keys)
//! - `StoreData`: the materialized store shape plus the single shared
//!   commit-application routine
//! - `Error`: unified error type for all hearth APIs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod json;
pub mod store;
pub mod value;

pub use context::{ContextPath, ContextPathError};
pub use error::{Error, Result};
pub use json::{from_json, to_json, to_json_pretty, JsonError};
pub use store::{
    apply_commit, apply_op, child_contexts, context_keys, context_values, get_value, Commit,
    ContextEntries, Op, StoreData,
};
pub use value::{now_millis, Value};
