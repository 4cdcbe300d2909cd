//! Heterogeneous ordered-sequence plugin.
//!
//! Grounded in `serializer_plugins/tuple.py`: a tuple is just an ordered
//! sequence whose elements have each already been run through `serialize`
//! individually. Since Rust's native tuple types don't share a single
//! `TypeId` across arities and element types, this plugin operates on an
//! explicit [`Tuple`] newtype over already-converted [`Value`]s — callers
//! build one from a native Rust tuple by converting each element with the
//! registry first.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::value::Value;

/// An ordered, heterogeneous sequence of already-converted wire values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple(pub Vec<Value>);

impl From<(Value, Value)> for Tuple {
    fn from((a, b): (Value, Value)) -> Self {
        Tuple(vec![a, b])
    }
}

impl From<(Value, Value, Value)> for Tuple {
    fn from((a, b, c): (Value, Value, Value)) -> Self {
        Tuple(vec![a, b, c])
    }
}

pub(crate) fn install(registry: &mut CodecRegistry) {
    registry
        .register_type::<Tuple, _, _>(
            "tuple",
            |v: &Tuple, _: &Options| -> Result<Value> { Ok(Value::Array(v.0.clone())) },
            |v: Value, _: &Options| -> Result<Tuple> {
                match v {
                    Value::Array(items) => Ok(Tuple(items)),
                    _ => Err(CommError::Malformed("tuple payload was not an array".into())),
                }
            },
            false,
        )
        .expect("default plugin registration cannot collide");
}
