//! Canonical JSON helpers.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use dias_core::DiasError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key order.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, DiasError> {
    let value =
        serde_json::to_value(value).map_err(|err| DiasError::serde("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical)
        .map_err(|err| DiasError::serde("json_write", err))?;
    Ok(bytes)
}

/// Pretty-printed canonical JSON, used for the persisted run report.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, DiasError> {
    let value =
        serde_json::to_value(value).map_err(|err| DiasError::serde("json_serialize", err))?;
    serde_json::to_vec_pretty(&canonicalize(value))
        .map_err(|err| DiasError::serde("json_write", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, DiasError> {
    serde_json::from_slice(data).map_err(|err| DiasError::serde("json_deserialize", err))
}
