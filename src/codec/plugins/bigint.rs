//! Arbitrary-precision integer plugin.
//!
//! Grounded in `serializer_plugins/int.py` (and `gmpy.py`, which differs
//! only in which Python integer type it wraps): encode as little-endian
//! two's complement bytes using the minimal length that round-trips the
//! sign, `⌈(bit_length + 8) / 8⌉` bytes as the Python source computes it.

use num_bigint::BigInt as Inner;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::value::Value;

/// An arbitrary-precision signed integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigInt(pub Inner);

pub(crate) fn install(registry: &mut CodecRegistry) {
    registry
        .register_type::<BigInt, _, _>(
            "bigint",
            |v: &BigInt, _: &Options| -> Result<Value> {
                let bytes = v.0.to_signed_bytes_le();
                Ok(Value::Bytes(bytes))
            },
            |v: Value, _: &Options| -> Result<BigInt> {
                let Value::Bytes(bytes) = v else {
                    return Err(CommError::Malformed("bigint payload was not bytes".into()));
                };
                if bytes.is_empty() {
                    return Ok(BigInt(Inner::from(0)));
                }
                Ok(BigInt(Inner::from_signed_bytes_le(&bytes)))
            },
            false,
        )
        .expect("default plugin registration cannot collide");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_negative_and_positive_values() {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        for n in [0i64, 1, -1, 255, -255, i64::MAX, i64::MIN] {
            let value = BigInt(Inner::from(n));
            let wire = reg.to_value(&value, &opts).unwrap();
            let back: BigInt = reg.from_value(wire, &opts).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn round_trips_values_wider_than_64_bits() {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let huge = Inner::from(i64::MAX) * Inner::from(1_000_000_007i64);
        let value = BigInt(huge);
        let wire = reg.to_value(&value, &opts).unwrap();
        let back: BigInt = reg.from_value(wire, &opts).unwrap();
        assert_eq!(back, value);
    }
}
