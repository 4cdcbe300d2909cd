//! Bit array plugin.
//!
//! Grounded in `serializer_plugins/bitarray.py`: the underlying bit-vector
//! library already has a compact native byte representation, so the plugin
//! just stores those bytes plus the exact bit length (the library's byte
//! buffer is padded to a whole number of bytes and would otherwise lose the
//! true length on round-trip).

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::value::Value;

/// An owned, arbitrary-length bit vector.
#[derive(Debug, Clone, PartialEq)]
pub struct BitSet(pub BitVec<u8, Lsb0>);

impl Serialize for BitSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.0.len() as u64;
        let bytes = self.0.clone().into_vec();
        (len, bytes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BitSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (len, bytes): (u64, Vec<u8>) = Deserialize::deserialize(deserializer)?;
        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        bits.truncate(len as usize);
        Ok(BitSet(bits))
    }
}

pub(crate) fn install(registry: &mut CodecRegistry) {
    registry
        .register_type::<BitSet, _, _>(
            "bitarray",
            |v: &BitSet, _: &Options| -> Result<Value> {
                let len = v.0.len() as u64;
                let bytes = v.0.clone().into_vec();
                Ok(Value::Map(vec![
                    (Value::Str("len".into()), Value::UInt(len)),
                    (Value::Str("bytes".into()), Value::Bytes(bytes)),
                ]))
            },
            |v: Value, _: &Options| -> Result<BitSet> {
                let map = v
                    .into_btree_map()
                    .ok_or_else(|| CommError::Malformed("bitarray payload was not a map".into()))?;
                let len = match map.get("len") {
                    Some(Value::UInt(n)) => *n as usize,
                    _ => return Err(CommError::Malformed("bitarray payload missing len".into())),
                };
                let bytes = match map.get("bytes") {
                    Some(Value::Bytes(b)) => b.clone(),
                    _ => return Err(CommError::Malformed("bitarray payload missing bytes".into())),
                };
                let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
                bits.truncate(len);
                Ok(BitSet(bits))
            },
            false,
        )
        .expect("default plugin registration cannot collide");
}
