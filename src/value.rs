//! The structural wire representation walked by the envelope codec.
//!
//! Python's `pack`/`unpack` operate on whatever the `msgpack`/`pickle` layer
//! can already express (dicts, lists, ints, strings, bytes) plus the
//! `{"type": ..., "data": ...}` tagging `serialization.py` applies to
//! registered leaf types. `Value` is that same structural AST made explicit
//! so the Rust codec can walk it without reflection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A structurally typed wire value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value (Python's `None`).
    Null,
    /// A boolean leaf.
    Bool(bool),
    /// A signed integer leaf (fits any value that isn't arbitrary precision;
    /// arbitrary precision integers go through the `bigint` codec plugin).
    Int(i64),
    /// An unsigned integer leaf.
    UInt(u64),
    /// A floating point leaf.
    Float(f64),
    /// A UTF-8 string leaf.
    Str(String),
    /// A raw byte string leaf.
    Bytes(Vec<u8>),
    /// An ordered sequence, e.g. a Python list or tuple.
    Array(Vec<Value>),
    /// An ordered key/value sequence. Kept as a `Vec` of pairs rather than a
    /// `HashMap` so that insertion order round-trips, matching the `{type,
    /// data}` tagging convention where key order is `type` then `data`.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds the `{"type": name, "data": data}` tagged record `serialize`
    /// produces around every registered leaf type.
    pub fn tagged(type_name: &str, data: Value) -> Value {
        Value::Map(vec![
            (Value::Str("type".to_string()), Value::Str(type_name.to_string())),
            (Value::Str("data".to_string()), data),
        ])
    }

    /// Returns `Some((type_name, data))` if this value is a two-key
    /// `{type, data}` tagged record, matching `serialization.py`'s detection
    /// of already-serialized leaves during `collection_deserialize`.
    pub fn as_tagged(&self) -> Option<(&str, &Value)> {
        let Value::Map(pairs) = self else { return None };
        if pairs.len() != 2 {
            return None;
        }
        let mut type_name = None;
        let mut data = None;
        for (k, v) in pairs {
            match k {
                Value::Str(s) if s == "type" => {
                    if let Value::Str(t) = v {
                        type_name = Some(t.as_str());
                    } else {
                        return None;
                    }
                }
                Value::Str(s) if s == "data" => data = Some(v),
                _ => return None,
            }
        }
        match (type_name, data) {
            (Some(t), Some(d)) => Some((t, d)),
            _ => None,
        }
    }

    /// Converts to a `BTreeMap` for the rare case a caller wants dictionary
    /// lookups rather than order-preserving iteration.
    pub fn into_btree_map(self) -> Option<BTreeMap<String, Value>> {
        let Value::Map(pairs) = self else { return None };
        let mut out = BTreeMap::new();
        for (k, v) in pairs {
            if let Value::Str(s) = k {
                out.insert(s, v);
            } else {
                return None;
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_round_trips_through_as_tagged() {
        let v = Value::tagged("int", Value::Bytes(vec![1, 2, 3]));
        let (name, data) = v.as_tagged().expect("tagged value");
        assert_eq!(name, "int");
        assert_eq!(data, &Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn plain_map_is_not_tagged() {
        let v = Value::Map(vec![(Value::Str("a".into()), Value::Int(1))]);
        assert!(v.as_tagged().is_none());
    }
}
