//! Decommutated field map parsing
//!
//! The JSON payload of a log entry is an object mapping field name to
//! value. Numeric and binary fields are self-describing tagged objects
//! carrying the source type declaration:
//!
//! ```json
//! {
//!   "TEMP1":   {"$t": "FLOAT", "$w": 32, "$v": 21.5},
//!   "TEMP2":   {"$t": "FLOAT", "$w": 32, "$v": "Infinity"},
//!   "COUNT":   {"$t": "UINT",  "$w": 16, "$v": 42},
//!   "PAYLOAD": {"$t": "BLOCK", "$v": "3q2+7w=="},
//!   "STATE":   "RUNNING",
//!   "LIMITS":  [10, 20, 30]
//! }
//! ```
//!
//! Bare strings, booleans, arrays, and objects pass through untagged. A
//! bare number carries no width declaration and is treated as a 64-bit
//! float, matching JSON number semantics (derived values are the usual
//! source of these). Non-finite floats are encoded as the strings
//! `"Infinity"`, `"-Infinity"`, `"NaN"`; a `$v` of `null` declares an
//! absent value.

use crate::coerce::{FieldValue, FloatWidth, IntWidth, NullKind};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

/// Parse a JSON payload into the ordered field map
///
/// Errors describe why the whole entry is unusable; the decoder turns
/// them into a `Skip` outcome.
pub fn parse_fields(payload: &[u8]) -> Result<Vec<(String, FieldValue)>, String> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| format!("invalid JSON payload: {}", e))?;

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "payload must be an object, got {}",
                type_name(&other)
            ))
        },
    };

    let mut fields = Vec::with_capacity(map.len());
    for (name, raw) in map {
        let parsed = parse_value(raw).map_err(|e| format!("field {}: {}", name, e))?;
        fields.push((name, parsed));
    }
    Ok(fields)
}

fn parse_value(raw: Value) -> Result<FieldValue, String> {
    match raw {
        Value::Object(map) if map.contains_key("$t") => parse_tagged(map),
        Value::Object(map) => Ok(FieldValue::Object(map)),
        Value::Array(items) => Ok(FieldValue::Array(items)),
        Value::String(s) => Ok(FieldValue::Text(s)),
        Value::Bool(b) => Ok(FieldValue::Bool(b)),
        // Untagged numbers have no width declaration; JSON numbers are
        // doubles
        Value::Number(n) => n
            .as_f64()
            .map(FieldValue::Float64)
            .ok_or_else(|| "untagged number out of f64 range".to_string()),
        Value::Null => Ok(FieldValue::Null(NullKind::Other)),
    }
}

fn parse_tagged(map: serde_json::Map<String, Value>) -> Result<FieldValue, String> {
    let tag = map
        .get("$t")
        .and_then(Value::as_str)
        .ok_or("$t must be a string")?;
    let value = map.get("$v").cloned().unwrap_or(Value::Null);

    match tag {
        "INT" => {
            let width = tagged_int_width(&map)?;
            match value {
                Value::Null => Ok(FieldValue::Null(NullKind::Int(width))),
                Value::Number(n) => {
                    let v = n
                        .as_i64()
                        .ok_or_else(|| format!("INT value {} not a signed integer", n))?;
                    Ok(FieldValue::Int { width, value: v })
                },
                other => Err(format!("INT value must be a number, got {}", type_name(&other))),
            }
        },
        "UINT" => {
            let width = tagged_int_width(&map)?;
            match value {
                Value::Null => Ok(FieldValue::Null(NullKind::Uint(width))),
                Value::Number(n) => {
                    let v = n
                        .as_u64()
                        .ok_or_else(|| format!("UINT value {} not an unsigned integer", n))?;
                    Ok(FieldValue::Uint { width, value: v })
                },
                other => Err(format!("UINT value must be a number, got {}", type_name(&other))),
            }
        },
        "FLOAT" => {
            let bits = map
                .get("$w")
                .and_then(Value::as_u64)
                .ok_or("FLOAT requires numeric $w")?;
            let width =
                FloatWidth::from_bits(bits).ok_or_else(|| format!("bad FLOAT width {}", bits))?;
            let v = match value {
                Value::Null => return Ok(FieldValue::Null(NullKind::Float(width))),
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| format!("FLOAT value {} out of range", n))?,
                Value::String(s) => match s.as_str() {
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    "NaN" => f64::NAN,
                    other => return Err(format!("unknown FLOAT literal {:?}", other)),
                },
                other => {
                    return Err(format!("FLOAT value must be a number, got {}", type_name(&other)))
                },
            };
            Ok(match width {
                FloatWidth::W32 => FieldValue::Float32(v as f32),
                FloatWidth::W64 => FieldValue::Float64(v),
            })
        },
        "BLOCK" => match value {
            Value::Null => Ok(FieldValue::Null(NullKind::Other)),
            Value::String(s) => {
                let bytes = BASE64
                    .decode(s.as_bytes())
                    .map_err(|e| format!("BLOCK is not valid base64: {}", e))?;
                Ok(FieldValue::Bytes(bytes))
            },
            other => Err(format!("BLOCK value must be a string, got {}", type_name(&other))),
        },
        other => Err(format!("unknown type tag {:?}", other)),
    }
}

fn tagged_int_width(map: &serde_json::Map<String, Value>) -> Result<IntWidth, String> {
    let bits = map
        .get("$w")
        .and_then(Value::as_u64)
        .ok_or("integer tag requires numeric $w")?;
    IntWidth::from_bits(bits).ok_or_else(|| format!("bad integer width {}", bits))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
