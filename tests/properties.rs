//! Universally-quantified properties from spec.md §8, checked with
//! `proptest` rather than a handful of hand-picked examples.

use mpc_comm_pool::codec::{CodecRegistry, Options};
use mpc_comm_pool::message::MessageId;
use num_bigint::BigInt as Inner;
use proptest::prelude::*;

proptest! {
    /// Property 1: any value a bundled codec plugin accepts survives an
    /// encode/decode round trip unchanged.
    #[test]
    fn bigint_round_trips_through_the_registry(bytes in proptest::collection::vec(any::<i64>(), 1..8)) {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let value = bytes.into_iter().fold(Inner::from(0), |acc, n| acc * Inner::from(i64::MAX) + Inner::from(n));
        let wrapped = mpc_comm_pool::codec::plugins::BigInt(value.clone());
        let wire = reg.to_value(&wrapped, &opts).unwrap();
        let back: mpc_comm_pool::codec::plugins::BigInt = reg.from_value(wire, &opts).unwrap();
        prop_assert_eq!(back.0, value);
    }

    /// Strings round-trip through the opaque bincode fallback untouched,
    /// for any printable-ish input including empty strings and embedded
    /// control characters.
    #[test]
    fn arbitrary_strings_round_trip_through_the_opaque_fallback(s in ".*") {
        let reg = CodecRegistry::new();
        let opts = Options::default();
        let wire = reg.to_value(&s, &opts).unwrap();
        let back: String = reg.from_value(wire, &opts).unwrap();
        prop_assert_eq!(back, s);
    }

    /// Property 2: applying a prefix to two distinct ids never collapses
    /// them onto the same wire id, whether the ids started out as `Int` or
    /// `Str`.
    #[test]
    fn prefixing_preserves_distinctness_of_int_ids(a in any::<u64>(), b in any::<u64>(), prefix in "[a-z]{0,8}") {
        prop_assume!(a != b);
        let pa = MessageId::Int(a).apply_prefix(Some(&prefix));
        let pb = MessageId::Int(b).apply_prefix(Some(&prefix));
        prop_assert_ne!(pa, pb);
    }

    #[test]
    fn prefixing_preserves_distinctness_of_str_ids(a in "[a-zA-Z0-9_]{1,12}", b in "[a-zA-Z0-9_]{1,12}", prefix in "[a-z]{0,8}") {
        prop_assume!(a != b);
        let pa = MessageId::Str(a).apply_prefix(Some(&prefix));
        let pb = MessageId::Str(b).apply_prefix(Some(&prefix));
        prop_assert_ne!(pa, pb);
    }

    /// No prefix is always the identity, for any id.
    #[test]
    fn no_prefix_never_changes_an_int_id(n in any::<u64>()) {
        let id = MessageId::Int(n);
        prop_assert_eq!(id.apply_prefix(None), id);
    }
}
