//! N-dimensional numeric array plugin.
//!
//! Grounded in `serializer_plugins/numpy.py`: encodes as `{values, shape}`
//! with two edge cases preserved from the Python source — an empty `shape`
//! means a 0-dimensional scalar array, and an empty `values` list with a
//! non-empty `shape` means an empty array of that shape.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::value::Value;

/// An owned, dynamically dimensioned array of 64-bit floats.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray(pub ArrayD<f64>);

impl Serialize for NdArray {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let shape: Vec<usize> = self.0.shape().to_vec();
        let values: Vec<f64> = self.0.iter().copied().collect();
        (shape, values).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NdArray {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (shape, values): (Vec<usize>, Vec<f64>) = Deserialize::deserialize(deserializer)?;
        let array = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(serde::de::Error::custom)?;
        Ok(NdArray(array))
    }
}

pub(crate) fn install(registry: &mut CodecRegistry) {
    registry
        .register_type::<NdArray, _, _>(
            "ndarray",
            |v: &NdArray, _: &Options| -> Result<Value> {
                let shape: Vec<Value> = v.0.shape().iter().map(|d| Value::UInt(*d as u64)).collect();
                let values: Vec<Value> = v.0.iter().map(|x| Value::Float(*x)).collect();
                Ok(Value::Map(vec![
                    (Value::Str("shape".into()), Value::Array(shape)),
                    (Value::Str("values".into()), Value::Array(values)),
                ]))
            },
            |v: Value, _: &Options| -> Result<NdArray> {
                let map = v
                    .into_btree_map()
                    .ok_or_else(|| CommError::Malformed("ndarray payload was not a map".into()))?;
                let shape = match map.get("shape") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::UInt(n) => Ok(*n as usize),
                            _ => Err(CommError::Malformed("ndarray shape entry was not a uint".into())),
                        })
                        .collect::<Result<Vec<usize>>>()?,
                    _ => return Err(CommError::Malformed("ndarray payload missing shape".into())),
                };
                let values = match map.get("values") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::Float(f) => Ok(*f),
                            _ => Err(CommError::Malformed("ndarray value entry was not a float".into())),
                        })
                        .collect::<Result<Vec<f64>>>()?,
                    _ => return Err(CommError::Malformed("ndarray payload missing values".into())),
                };
                if shape.is_empty() {
                    let scalar = values.first().copied().unwrap_or(0.0);
                    return Ok(NdArray(ArrayD::from_shape_vec(IxDyn(&[]), vec![scalar]).unwrap()));
                }
                let array = ArrayD::from_shape_vec(IxDyn(&shape), values)
                    .map_err(|e| CommError::Malformed(format!("ndarray shape/values mismatch: {e}")))?;
                Ok(NdArray(array))
            },
            false,
        )
        .expect("default plugin registration cannot collide");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn round_trips_2d_array() {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let a = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let value = NdArray(a.clone());
        let wire = reg.to_value(&value, &opts).unwrap();
        let back: NdArray = reg.from_value(wire, &opts).unwrap();
        assert_eq!(back.0, a);
    }

    #[test]
    fn round_trips_scalar_empty_shape() {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let a = ArrayD::from_shape_vec(IxDyn(&[]), vec![42.0]).unwrap();
        let value = NdArray(a.clone());
        let wire = reg.to_value(&value, &opts).unwrap();
        let back: NdArray = reg.from_value(wire, &opts).unwrap();
        assert_eq!(back.0, a);
    }
}
