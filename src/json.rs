//! Dynamic-value tree <-> JSON mapping (spec §6's "collaborator" between the
//! public API's value tree and JSON). Grounded on the teacher's use of
//! `serde_json` for structured output in `src/results.rs`; explicit
//! conversion functions are used here rather than `Value`'s derived untagged
//! (de)serialization alone, since round-tripping i64/u64 through JSON
//! numbers needs the sign made explicit instead of inferred from magnitude.

use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};

use crate::error::{ApxResult, ErrorKind};
use crate::model::value::Value;

/// Convert a dynamic value into a `serde_json::Value`.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::I64(v) => Json::Number(Number::from(*v)),
        Value::U64(v) => Json::Number(Number::from(*v)),
        Value::Bool(b) => Json::Bool(*b),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Hash(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.clone(), to_json(v));
            }
            Json::Object(map)
        }
    }
}

/// Convert a `serde_json::Value` into a dynamic value. Numbers without a
/// fractional part become `I64` if negative, `U64` otherwise; floats are
/// rejected since no data-element scalar kind is floating-point (spec §3).
pub fn from_json(json: &Json) -> ApxResult<Value> {
    Ok(match json {
        Json::Null => return Err(ErrorKind::InvalidArgument("null has no APX value representation".into())),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i < 0 {
                    Value::I64(i)
                } else {
                    Value::U64(i as u64)
                }
            } else if let Some(u) = n.as_u64() {
                Value::U64(u)
            } else {
                return Err(ErrorKind::InvalidArgument(format!("non-integer JSON number {}", n)));
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            let mut converted = Vec::with_capacity(items.len());
            for item in items {
                converted.push(from_json(item)?);
            }
            Value::Array(converted)
        }
        Json::Object(map) => {
            let mut fields = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                fields.insert(k.clone(), from_json(v)?);
            }
            Value::Hash(fields)
        }
    })
}
