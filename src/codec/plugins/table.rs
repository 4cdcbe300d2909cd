//! Tabular data fallback plugin.
//!
//! Grounded in `serializer_plugins/pandas.py`'s fallback branch: no
//! dependency in this crate's ecosystem provides a compact dataframe
//! codec, so — exactly as the Python source does when no faster codec for
//! the installed dataframe library is available — a table is always split
//! into `{columns, index, data}` records.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::value::Value;

/// A minimal tabular value: column names, a row index, and row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// Row index values, one per row.
    pub index: Vec<Value>,
    /// Row-major cell data; `data[row][col]`.
    pub data: Vec<Vec<Value>>,
}

pub(crate) fn install(registry: &mut CodecRegistry) {
    registry
        .register_type::<Table, _, _>(
            "table",
            |v: &Table, _: &Options| -> Result<Value> {
                let columns = Value::Array(v.columns.iter().cloned().map(Value::Str).collect());
                let index = Value::Array(v.index.clone());
                let data = Value::Array(v.data.iter().cloned().map(Value::Array).collect());
                Ok(Value::Map(vec![
                    (Value::Str("columns".into()), columns),
                    (Value::Str("index".into()), index),
                    (Value::Str("data".into()), data),
                ]))
            },
            |v: Value, _: &Options| -> Result<Table> {
                let map = v
                    .into_btree_map()
                    .ok_or_else(|| CommError::Malformed("table payload was not a map".into()))?;
                let columns = match map.get("columns") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => Ok(s.clone()),
                            _ => Err(CommError::Malformed("table column name was not a string".into())),
                        })
                        .collect::<Result<Vec<String>>>()?,
                    _ => return Err(CommError::Malformed("table payload missing columns".into())),
                };
                let index = match map.get("index") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return Err(CommError::Malformed("table payload missing index".into())),
                };
                let data = match map.get("data") {
                    Some(Value::Array(rows)) => rows
                        .iter()
                        .map(|row| match row {
                            Value::Array(cells) => Ok(cells.clone()),
                            _ => Err(CommError::Malformed("table row was not an array".into())),
                        })
                        .collect::<Result<Vec<Vec<Value>>>>()?,
                    _ => return Err(CommError::Malformed("table payload missing data".into())),
                };
                Ok(Table { columns, index, data })
            },
            false,
        )
        .expect("default plugin registration cannot collide");
}
