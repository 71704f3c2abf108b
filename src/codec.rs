//! Payload codec: encode/decode a top-level mapping in text (JSON) or
//! compact (CBOR) form.
//!
//! The compact codec is an external collaborator by design: any
//! encoder/decoder pair honoring the same contract (encode a mapping to
//! bytes, decode bytes back to a mapping, reject non-mapping top-level
//! values) is substitutable. This crate uses `ciborium` for that role.

use serde_json::{Map, Value};

use crate::error::CodecError;

/// The two payload representations a connection may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 JSON text.
    Text,
    /// Compact binary (CBOR).
    Compact,
}

impl Encoding {
    /// Maps the wire `content_encoding` byte to an [`Encoding`].
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Encoding::Text),
            1 => Some(Encoding::Compact),
            _ => None,
        }
    }

    /// Maps an [`Encoding`] back to its wire `content_encoding` byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Encoding::Text => 0,
            Encoding::Compact => 1,
        }
    }
}

/// A decoded payload: a top-level JSON mapping. Nested values may be of any
/// JSON-expressible type.
pub type Payload = Map<String, Value>;

/// Decodes `bytes` under the given encoding. Fails with [`CodecError`] if the
/// bytes do not parse, or the top-level value is not a mapping.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Payload, CodecError> {
    match encoding {
        Encoding::Text => decode_text(bytes),
        Encoding::Compact => decode_compact(bytes),
    }
}

/// Encodes `payload` under the given encoding.
pub fn encode(payload: &Payload, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Text => encode_text(payload),
        Encoding::Compact => encode_compact(payload),
    }
}

fn decode_text(bytes: &[u8]) -> Result<Payload, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::NotAMapping),
    }
}

fn encode_text(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

fn decode_compact(bytes: &[u8]) -> Result<Payload, CodecError> {
    let value: ciborium::value::Value = ciborium::de::from_reader(bytes)?;
    let json = cbor_to_json(value);
    match json {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::NotAMapping),
    }
}

fn encode_compact(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    let value = json_to_cbor(Value::Object(payload.clone()));
    let mut out = Vec::new();
    ciborium::ser::into_writer(&value, &mut out)?;
    Ok(out)
}

/// Converts a CBOR value tree into the equivalent `serde_json::Value` tree.
/// Non-string map keys are stringified, matching the structural-only
/// validation this codec is required to perform.
fn cbor_to_json(value: ciborium::value::Value) -> Value {
    use ciborium::value::Value as Cbor;
    match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => Value::Number(i128::from(i).into()),
        Cbor::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Cbor::Text(s) => Value::String(s),
        Cbor::Bytes(b) => Value::Array(b.into_iter().map(|byte| Value::from(byte)).collect()),
        Cbor::Array(items) => Value::Array(items.into_iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Cbor::Text(s) => s,
                    other => cbor_to_json(other).to_string(),
                };
                map.insert(key, cbor_to_json(v));
            }
            Value::Object(map)
        }
        _ => Value::Null,
    }
}

/// Converts a `serde_json::Value` tree into the equivalent CBOR value tree.
fn json_to_cbor(value: Value) -> ciborium::value::Value {
    use ciborium::value::Value as Cbor;
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Cbor::Integer(i.into())
            } else if let Some(f) = n.as_f64() {
                Cbor::Float(f)
            } else {
                Cbor::Null
            }
        }
        Value::String(s) => Cbor::Text(s),
        Value::Array(items) => Cbor::Array(items.into_iter().map(json_to_cbor).collect()),
        Value::Object(map) => Cbor::Map(
            map.into_iter()
                .map(|(k, v)| (Cbor::Text(k), json_to_cbor(v)))
                .collect(),
        ),
    }
}
