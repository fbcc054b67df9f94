//! Extended JSON codec
//!
//! Serializes [`Value`] to plain JSON text, extended so that byte buffers
//! and big integers survive a round trip:
//!
//! - `Bytes` encode as the tagged string `"$b64$<base64>"`
//! - `BigInt` encodes as the tagged string `"$bigint$<decimal>"`
//! - a literal string starting with `$` is escaped by doubling the sigil
//!   (`"$$rest"`)
//!
//! Decoding reverses the three forms; any other `$`-prefixed string is a
//! decode error rather than silently passing through. Non-finite floats are
//! rejected at encode time.

use crate::value::Value;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{Map, Number};
use std::collections::BTreeMap;
use thiserror::Error;

const BYTES_TAG: &str = "$b64$";
const BIGINT_TAG: &str = "$bigint$";

/// Errors raised by the extended JSON codec.
#[derive(Debug, Error)]
pub enum JsonError {
    /// A float was NaN or infinite.
    #[error("cannot serialize non-finite number")]
    NonFiniteNumber,

    /// A `$`-prefixed string did not match any known tag.
    #[error("unknown tagged string: {0}")]
    UnknownTag(String),

    /// The payload of a `$b64$` string was not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// The payload of a `$bigint$` string was not a decimal integer.
    #[error("invalid big integer payload: {0}")]
    InvalidBigInt(String),

    /// The text was not valid JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialize a value to a single-line JSON string.
pub fn to_json(value: &Value) -> Result<String, JsonError> {
    let json = value_to_json(value)?;
    Ok(serde_json::to_string(&json)?)
}

/// Serialize a value to pretty-printed JSON.
pub fn to_json_pretty(value: &Value) -> Result<String, JsonError> {
    let json = value_to_json(value)?;
    Ok(serde_json::to_string_pretty(&json)?)
}

/// Parse JSON text back into a value.
pub fn from_json(text: &str) -> Result<Value, JsonError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    value_from_json(&json)
}

/// Convert a value into a `serde_json::Value` tree, applying the tagged
/// string encodings.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, JsonError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number(Number::from(*n)),
        Value::Float(n) => serde_json::Value::Number(
            Number::from_f64(*n).ok_or(JsonError::NonFiniteNumber)?,
        ),
        Value::String(s) => serde_json::Value::String(encode_string(s)),
        Value::Bytes(b) => serde_json::Value::String(format!("{}{}", BYTES_TAG, BASE64.encode(b))),
        Value::BigInt(n) => serde_json::Value::String(format!("{}{}", BIGINT_TAG, n)),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(value_to_json).collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), value_to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
    })
}

/// Convert a `serde_json::Value` tree back into a value, reversing the
/// tagged string encodings.
pub fn value_from_json(json: &serde_json::Value) -> Result<Value, JsonError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                // Beyond i64 range but still integral
                Value::BigInt(u as i128)
            } else {
                // as_f64 is infallible for a parsed JSON number
                Value::Float(n.as_f64().ok_or(JsonError::NonFiniteNumber)?)
            }
        }
        serde_json::Value::String(s) => decode_string(s)?,
        serde_json::Value::Array(items) => Value::Array(
            items.iter().map(value_from_json).collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), value_from_json(v)?);
            }
            Value::Object(out)
        }
    })
}

fn encode_string(s: &str) -> String {
    if s.starts_with('$') {
        format!("${}", s)
    } else {
        s.to_string()
    }
}

fn decode_string(s: &str) -> Result<Value, JsonError> {
    if let Some(rest) = s.strip_prefix("$$") {
        return Ok(Value::String(format!("${}", rest)));
    }
    if let Some(payload) = s.strip_prefix(BYTES_TAG) {
        let bytes = BASE64
            .decode(payload)
            .map_err(|_| JsonError::InvalidBase64(payload.to_string()))?;
        return Ok(Value::Bytes(bytes));
    }
    if let Some(payload) = s.strip_prefix(BIGINT_TAG) {
        let n: i128 = payload
            .parse()
            .map_err(|_| JsonError::InvalidBigInt(payload.to_string()))?;
        return Ok(Value::BigInt(n));
    }
    if s.starts_with('$') {
        return Err(JsonError::UnknownTag(s.to_string()));
    }
    Ok(Value::String(s.to_string()))
}
