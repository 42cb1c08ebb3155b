//! Dynamic-value tree used at the public API boundary.
//!
//! Mirrors the runtime-typed value carried by the original `adt_*` family in
//! the C implementation (`apx_common`): a scalar, an ordered array, or an
//! ordered string-keyed hash. `Hash` preserves insertion order (records are
//! ordered in APX), hence `IndexMap` rather than `HashMap`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A runtime-typed value used for port initializers and the public read/write API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    I64(i64),
    U64(u64),
    Bool(bool),
    String(String),
    Array(Vec<Value>),
    Hash(IndexMap<String, Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::I64(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_accessors_cross_sign() {
        assert_eq!(Value::I64(5).as_u64(), Some(5));
        assert_eq!(Value::U64(5).as_i64(), Some(5));
        assert_eq!(Value::I64(-1).as_u64(), None);
    }

    #[test]
    fn array_and_hash_round_trip_via_serde_json() {
        let mut h = IndexMap::new();
        h.insert("a".to_string(), Value::I64(1));
        h.insert("b".to_string(), Value::Array(vec![Value::Bool(true)]));
        let v = Value::Hash(h);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
