//! Value codec
//!
//! Maps application [`Value`]s onto [`NativeObject`]s and back. Encoding is
//! strict and reports the path of anything the native side cannot carry.
//! Decoding never fails: native kinds without a value equivalent become
//! `Null` and leave a [`Diagnostic`] behind.

use std::fmt;

use servlink_core::{path, Map, Value};

use crate::config::MAX_DEPTH;
use crate::error::{Error, Result};
use crate::native::NativeObject;

pub mod wire;

/// Encode a value into a native object
pub fn encode(value: &Value) -> Result<NativeObject> {
    encode_at(value, "", 0)
}

/// Encode a value to be sent as a message
///
/// The native send primitive only accepts dictionaries, so the top level
/// must be a mapping.
pub fn encode_message(value: &Value) -> Result<NativeObject> {
    match value {
        Value::Map(_) => encode(value),
        other => Err(unsupported(
            "",
            format!("message must be a map, found {}", other.type_name()),
        )),
    }
}

fn unsupported(path: &str, reason: impl Into<String>) -> Error {
    Error::UnsupportedValue {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn native_string(s: &str, at: &str) -> Result<String> {
    // Native strings are NUL-terminated; an interior NUL would truncate.
    if s.contains('\0') {
        return Err(unsupported(at, "string contains a NUL byte"));
    }
    Ok(s.to_string())
}

fn too_deep() -> String {
    format!("nested deeper than {MAX_DEPTH} levels")
}

/// `depth` counts the lists and maps enclosing `value`
fn encode_at(value: &Value, at: &str, depth: usize) -> Result<NativeObject> {
    let nested = matches!(value, Value::List(_) | Value::Map(_));
    if nested && depth >= MAX_DEPTH {
        return Err(unsupported(at, too_deep()));
    }

    Ok(match value {
        Value::Null => NativeObject::Null,
        Value::Bool(b) => NativeObject::Bool(*b),
        Value::Int(i) => NativeObject::Int64(*i),
        Value::Double(d) if d.is_finite() => NativeObject::Double(*d),
        Value::Double(d) => return Err(unsupported(at, format!("non-finite float {d}"))),
        Value::String(s) => NativeObject::String(native_string(s, at)?),
        Value::Bytes(b) => NativeObject::Data(b.clone()),
        Value::List(items) => NativeObject::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_at(item, &path::join_index(at, i), depth + 1))
                .collect::<Result<_>>()?,
        ),
        Value::Map(map) => {
            let mut dict = std::collections::BTreeMap::new();
            for (key, item) in map {
                let child = path::join_key(at, key);
                if key.contains('\0') {
                    return Err(unsupported(&child, "map key contains a NUL byte"));
                }
                dict.insert(key.clone(), encode_at(item, &child, depth + 1)?);
            }
            NativeObject::Dictionary(dict)
        }
    })
}

/// Note left by decoding when a native object had no value equivalent
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub path: String,
    pub native_type: String,
    pub note: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at `{}` decoded as null: {}",
            self.native_type,
            path::display(&self.path),
            self.note
        )
    }
}

/// Result of decoding a native object
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decode a native object, discarding diagnostics
pub fn decode(native: &NativeObject) -> Value {
    decode_with_diagnostics(native).value
}

/// Decode a native object, collecting a diagnostic for every part that had
/// to be replaced by `Null`
pub fn decode_with_diagnostics(native: &NativeObject) -> Decoded {
    let mut diagnostics = Vec::new();
    let value = decode_at(native, "", 0, &mut diagnostics);
    Decoded { value, diagnostics }
}

fn degrade(
    native: &NativeObject,
    at: &str,
    note: String,
    diagnostics: &mut Vec<Diagnostic>,
) -> Value {
    diagnostics.push(Diagnostic {
        path: at.to_string(),
        native_type: native.type_name().to_string(),
        note,
    });
    Value::Null
}

fn decode_at(
    native: &NativeObject,
    at: &str,
    depth: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Value {
    let nested = matches!(native, NativeObject::Array(_) | NativeObject::Dictionary(_));
    if nested && depth >= MAX_DEPTH {
        return degrade(native, at, too_deep(), diagnostics);
    }

    match native {
        NativeObject::Null => Value::Null,
        NativeObject::Bool(b) => Value::Bool(*b),
        NativeObject::Int64(i) => Value::Int(*i),
        NativeObject::Uint64(u) => match i64::try_from(*u) {
            Ok(i) => Value::Int(i),
            Err(_) => degrade(
                native,
                at,
                format!("{u} exceeds the signed 64-bit range"),
                diagnostics,
            ),
        },
        NativeObject::Double(d) => Value::Double(*d),
        NativeObject::String(s) => Value::String(s.clone()),
        NativeObject::Data(b) => Value::Bytes(b.clone()),
        NativeObject::Uuid(u) => Value::Bytes(u.to_vec()),
        NativeObject::Date(_) => degrade(
            native,
            at,
            "dates have no value equivalent".to_string(),
            diagnostics,
        ),
        NativeObject::Error(e) => degrade(native, at, format!("embedded error ({e})"), diagnostics),
        NativeObject::Unsupported(_) => degrade(
            native,
            at,
            "object kind has no value equivalent".to_string(),
            diagnostics,
        ),
        NativeObject::Array(items) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode_at(item, &path::join_index(at, i), depth + 1, diagnostics))
                .collect(),
        ),
        NativeObject::Dictionary(dict) => {
            let mut map = Map::new();
            for (k, item) in dict {
                let child = path::join_key(at, k);
                map.insert(k.clone(), decode_at(item, &child, depth + 1, diagnostics));
            }
            Value::Map(map)
        }
    }
}
