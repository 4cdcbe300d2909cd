//! Bundled default codec plugins, one module per
//! `original_source/serializer_plugins/*.py` file.

mod bigint;
mod bitset;
mod ndarray_plugin;
mod table;
mod tuple;

pub use bigint::BigInt;
pub use bitset::BitSet;
pub use ndarray_plugin::NdArray;
pub use table::Table;
pub use tuple::Tuple;

use super::CodecRegistry;

/// Installs every bundled default plugin into `registry`.
///
/// Called both by [`CodecRegistry::new`] and by `clear(reload_defaults =
/// true)`, matching the Python module import side effect of registering
/// `int`, `tuple`, `numpy`, and `bitarray` (`gmpy` is folded into the
/// arbitrary-precision `bigint` plugin; `pandas` is represented by the
/// always-fallback [`Table`] plugin).
pub(crate) fn install_defaults(registry: &mut CodecRegistry) {
    bigint::install(registry);
    tuple::install(registry);
    ndarray_plugin::install(registry);
    bitset::install(registry);
    table::install(registry);
}
