//! Extensible, type-name-keyed serialization registry (component C2).
//!
//! Grounded in `original_source/src/tno/mpc/communication/serialization.py`'s
//! `Serialization` class: a pair of registries (serializer by concrete type,
//! deserializer by wire type-name string) plus a handful of bundled default
//! plugins. Python dispatches on `type(obj)` and validates handler call
//! signatures at registration time via `inspect`; Rust has no runtime
//! reflection over closure parameter names, so registration-time validation
//! here checks the invariant that actually matters for memory safety and
//! correctness — that a type name isn't silently shadowed, and that a
//! dynamically registered pair agrees on the value type it bridges.
//!
//! [`CodecRegistry::to_value`]/[`CodecRegistry::from_value`] dispatch a
//! single named Rust type at the top of the envelope. For the "array of
//! custom" and "mapping of custom" cases from spec.md §4.2 step 2,
//! [`CodecRegistry::to_value_seq`]/[`CodecRegistry::from_value_seq`] and
//! their map counterparts walk a homogeneous container and dispatch each
//! element individually, rather than letting the whole container fall
//! through to one opaque `bincode` blob.

pub mod plugins;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CommError, Result};
use crate::message::Envelope;
use crate::value::Value;

/// Out-of-band context forwarded to every serializer/deserializer call.
///
/// Mirrors the Python `**kwargs` bag threaded through `serialize`/
/// `deserialize`; `origin` is the open question from spec.md §9 resolved as
/// an opaque, clonable handle rather than anything the registry interprets.
#[derive(Clone, Default)]
pub struct Options {
    /// Opaque handle to the client a value was received from, when known.
    pub origin: Option<Arc<dyn Any + Send + Sync>>,
}

type SerializeFn = dyn Fn(&dyn Any, &Options) -> Result<Value> + Send + Sync;
type DeserializeFn = dyn Fn(Value, &Options) -> Result<Box<dyn Any + Send>> + Send + Sync;

struct SerializerEntry {
    type_name: &'static str,
    func: Arc<SerializeFn>,
}

struct DeserializerEntry {
    type_id: TypeId,
    func: Arc<DeserializeFn>,
}

/// A registry of serializers (by Rust type) and deserializers (by wire type
/// name), mirroring `Serialization`'s two class-level dicts.
pub struct CodecRegistry {
    serializers: HashMap<TypeId, SerializerEntry>,
    deserializers: HashMap<String, DeserializerEntry>,
    fallback_to_opaque: bool,
}

impl CodecRegistry {
    /// Builds a registry with the bundled default plugins installed, as
    /// `Serialization` does at import time.
    pub fn new() -> Self {
        let mut reg = Self {
            serializers: HashMap::new(),
            deserializers: HashMap::new(),
            fallback_to_opaque: true,
        };
        plugins::install_defaults(&mut reg);
        reg
    }

    /// Registers a serializer/deserializer pair for `T` under `type_name`.
    ///
    /// Matches `Serialization.register`: refuses to shadow an existing
    /// deserializer for the same type name unless `overwrite` is set.
    pub fn register_type<T, S, D>(
        &mut self,
        type_name: &'static str,
        serialize: S,
        deserialize: D,
        overwrite: bool,
    ) -> Result<()>
    where
        T: Any + Send + 'static,
        S: Fn(&T, &Options) -> Result<Value> + Send + Sync + 'static,
        D: Fn(Value, &Options) -> Result<T> + Send + Sync + 'static,
    {
        if !overwrite && self.deserializers.contains_key(type_name) {
            return Err(CommError::AlreadyRegistered(type_name.to_string()));
        }
        let type_id = TypeId::of::<T>();
        self.serializers.insert(
            type_id,
            SerializerEntry {
                type_name,
                func: Arc::new(move |any, opts| {
                    let value = any
                        .downcast_ref::<T>()
                        .expect("serializer invoked with mismatched concrete type");
                    serialize(value, opts)
                }),
            },
        );
        self.deserializers.insert(
            type_name.to_string(),
            DeserializerEntry {
                type_id,
                func: Arc::new(move |value, opts| {
                    deserialize(value, opts).map(|v| Box::new(v) as Box<dyn Any + Send>)
                }),
            },
        );
        Ok(())
    }

    /// Registers a dynamically typed serializer/deserializer pair, checked
    /// for signature/type agreement at call time rather than compile time.
    ///
    /// This is the one runtime-checked entry point the registry exposes,
    /// standing in for Python's ability to register arbitrary callables
    /// discovered via `inspect`.
    pub fn register_dyn(
        &mut self,
        type_name: &'static str,
        type_id: TypeId,
        serialize: Arc<SerializeFn>,
        deserialize: Arc<DeserializeFn>,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && self.deserializers.contains_key(type_name) {
            return Err(CommError::AlreadyRegistered(type_name.to_string()));
        }
        if let Some(existing) = self.serializers.get(&type_id) {
            if existing.type_name != type_name {
                return Err(CommError::AnnotationError(type_name.to_string()));
            }
        }
        self.serializers.insert(type_id, SerializerEntry { type_name, func: serialize });
        self.deserializers
            .insert(type_name.to_string(), DeserializerEntry { type_id, func: deserialize });
        Ok(())
    }

    /// Clears all registered plugins. When `reload_defaults` is set, the
    /// bundled default plugins are reinstalled afterward, matching
    /// `Serialization.clear_serialization_logic(reload_defaults=...)`.
    pub fn clear(&mut self, reload_defaults: bool) {
        self.serializers.clear();
        self.deserializers.clear();
        if reload_defaults {
            plugins::install_defaults(self);
        }
    }

    /// Converts a concrete value into its tagged wire [`Value`].
    ///
    /// If no serializer is registered for `T`, falls back to an opaque
    /// `bincode` blob (the crate's stand-in for Python's pickle fallback)
    /// when `fallback_to_opaque` is set, else returns [`CommError::NoSerializer`].
    pub fn to_value<T: Any + Serialize>(&self, value: &T, opts: &Options) -> Result<Value> {
        if let Some(entry) = self.serializers.get(&TypeId::of::<T>()) {
            let data = (entry.func)(value as &dyn Any, opts)?;
            return Ok(Value::tagged(entry.type_name, data));
        }
        if self.fallback_to_opaque {
            let bytes = bincode::serialize(value)
                .map_err(|e| CommError::Malformed(format!("opaque fallback encode: {e}")))?;
            return Ok(Value::tagged("__opaque__", Value::Bytes(bytes)));
        }
        Err(CommError::NoSerializer(std::any::type_name::<T>()))
    }

    /// Converts a homogeneous sequence into a `Value::Array` of
    /// individually tagged elements.
    ///
    /// This is the array-element-wise half of spec.md §4.2 step 2's
    /// recursive walk ("if it is an ordered sequence, deserialize each
    /// element"): dispatching `to_value` per element, rather than handing
    /// the whole `Vec<T>` to `to_value::<Vec<T>>` (which has no serializer
    /// of its own and would swallow every element into one opaque `bincode`
    /// blob, defeating "array of custom" round-tripping with a foreign
    /// peer). Rust's static typing means the walk is driven by the
    /// caller's concrete `T` rather than a fully dynamic structural
    /// descent over an unknown shape, but the wire result is identical: an
    /// `Array` whose members are each independently `{type, data}` tagged.
    pub fn to_value_seq<T: Any + Serialize>(&self, items: &[T], opts: &Options) -> Result<Value> {
        let values = items.iter().map(|item| self.to_value(item, opts)).collect::<Result<Vec<_>>>()?;
        Ok(Value::Array(values))
    }

    /// Inverse of [`CodecRegistry::to_value_seq`]: decodes a `Value::Array`
    /// element-wise into a `Vec<T>`, dispatching `from_value` per element
    /// so a nested custom type inside each slot is reconstructed on its
    /// own terms rather than as part of one opaque blob.
    pub fn from_value_seq<T: Any + DeserializeOwned>(&self, value: Value, opts: &Options) -> Result<Vec<T>> {
        let Value::Array(items) = value else {
            return Err(CommError::Malformed("expected an array".into()));
        };
        items.into_iter().map(|item| self.from_value(item, opts)).collect()
    }

    /// Converts a mapping's values individually through the registry,
    /// keeping keys untouched.
    ///
    /// Mirrors spec.md §4.2 step 2's "otherwise it is a mapping of plain
    /// keys to values: deserialize each value" — the map-value-wise half
    /// of the recursive walk, for the case where `data` is itself a
    /// mapping rather than a `{type, data}` record.
    pub fn to_value_map<T: Any + Serialize>(&self, items: &[(Value, T)], opts: &Options) -> Result<Value> {
        let entries =
            items.iter().map(|(k, v)| Ok((k.clone(), self.to_value(v, opts)?))).collect::<Result<Vec<_>>>()?;
        Ok(Value::Map(entries))
    }

    /// Inverse of [`CodecRegistry::to_value_map`].
    pub fn from_value_map<T: Any + DeserializeOwned>(&self, value: Value, opts: &Options) -> Result<Vec<(Value, T)>> {
        let Value::Map(entries) = value else {
            return Err(CommError::Malformed("expected a map".into()));
        };
        entries.into_iter().map(|(k, v)| Ok((k, self.from_value(v, opts)?))).collect()
    }

    /// Converts a tagged wire [`Value`] back into `T`.
    pub fn from_value<T: Any + DeserializeOwned>(&self, value: Value, opts: &Options) -> Result<T> {
        let (type_name, data) = value
            .as_tagged()
            .ok_or_else(|| CommError::Malformed("expected a {type, data} tagged value".into()))?;
        if type_name == "__opaque__" {
            let Value::Bytes(bytes) = data else {
                return Err(CommError::Malformed("opaque payload was not bytes".into()));
            };
            return bincode::deserialize(bytes)
                .map_err(|e| CommError::Malformed(format!("opaque fallback decode: {e}")));
        }
        let entry = self
            .deserializers
            .get(type_name)
            .ok_or_else(|| CommError::NoDeserializer(type_name.to_string()))?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(CommError::UnrecognizedType(type_name.to_string()));
        }
        let boxed = (entry.func)(data.clone(), opts)?;
        boxed
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| CommError::UnrecognizedType(type_name.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes an [`Envelope`] to bytes for transmission.
///
/// Mirrors `Serialization.pack`: build the `{object, id}` record, then
/// encode the whole thing with the binary wire codec. Offloaded to a
/// blocking thread per spec.md §9 ("submit blocking work") since encoding a
/// large payload can take long enough to starve the async runtime.
pub async fn pack(envelope: Envelope) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        bincode::serialize(&envelope).map_err(|e| CommError::Malformed(e.to_string()))
    })
    .await
    .map_err(|e| CommError::Malformed(format!("pack task panicked: {e}")))?
}

/// Decodes bytes received from a peer back into an [`Envelope`].
pub async fn unpack(bytes: Vec<u8>) -> Result<Envelope> {
    tokio::task::spawn_blocking(move || {
        bincode::deserialize(&bytes).map_err(|e| CommError::Malformed(e.to_string()))
    })
    .await
    .map_err(|e| CommError::Malformed(format!("unpack task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_without_overwrite_fails() {
        let mut reg = CodecRegistry::new();
        let ok = reg.register_type::<bool, _, _>(
            "bool",
            |b, _| Ok(Value::Bool(*b)),
            |v, _| match v {
                Value::Bool(b) => Ok(b),
                _ => Err(CommError::Malformed("expected bool".into())),
            },
            false,
        );
        assert!(ok.is_ok());
        let second = reg.register_type::<bool, _, _>(
            "bool",
            |b, _| Ok(Value::Bool(*b)),
            |v, _| match v {
                Value::Bool(b) => Ok(b),
                _ => Err(CommError::Malformed("expected bool".into())),
            },
            false,
        );
        assert!(matches!(second, Err(CommError::AlreadyRegistered(_))));
    }

    #[test]
    fn unknown_type_falls_back_to_opaque_round_trip() {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let original = vec![1u8, 2, 3, 4];
        let wire = reg.to_value(&original, &opts).unwrap();
        let (tag, _) = wire.as_tagged().unwrap();
        assert_eq!(tag, "__opaque__");
        let back: Vec<u8> = reg.from_value(wire, &opts).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn sequence_of_custom_type_tags_each_element_independently() {
        use crate::codec::plugins::BigInt;
        use num_bigint::BigInt as Inner;

        let reg = CodecRegistry::new();
        let opts = Options::default();
        let items = vec![BigInt(Inner::from(1)), BigInt(Inner::from(-2)), BigInt(Inner::from(1_000_000_007i64))];
        let wire = reg.to_value_seq(&items, &opts).unwrap();
        let Value::Array(elements) = &wire else {
            panic!("expected an array");
        };
        for element in elements {
            let (tag, _) = element.as_tagged().expect("each element should carry its own tag");
            assert_eq!(tag, "bigint");
        }
        let back: Vec<BigInt> = reg.from_value_seq(wire, &opts).unwrap();
        assert_eq!(back, items);
    }

    #[tokio::test]
    async fn envelope_round_trips_through_pack_unpack() {
        let env = Envelope { object: Value::Str("hello".into()), id: crate::message::MessageId::Int(3) };
        let bytes = pack(env.clone()).await.unwrap();
        let back = unpack(bytes).await.unwrap();
        assert_eq!(back.id, env.id);
        assert_eq!(back.object, env.object);
    }
}
