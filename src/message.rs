//! Message identifiers and the envelope wrapping every value sent on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a single logical message within a [`crate::pool::Pool`].
///
/// Mirrors the Python `MessageId` union of `int | str`: callers may address
/// messages numerically or by name, and a [`Prefix`](MessageId::apply_prefix)
/// can be layered on top without losing either representation's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// A bare numeric id, e.g. the default auto-incrementing counter.
    Int(u64),
    /// A named id, or a numeric id that has had a string prefix applied.
    Str(String),
}

impl MessageId {
    /// Applies `prefix` to this id, always yielding a `Str` variant.
    ///
    /// Matches the Python implementation's `_prefix_msg_id`: an `Int` is
    /// rendered in decimal before the prefix is joined, a `Str` is joined
    /// as-is. `None` leaves the id unchanged.
    pub fn apply_prefix(&self, prefix: Option<&str>) -> MessageId {
        match prefix {
            None => self.clone(),
            Some(p) => match self {
                MessageId::Int(n) => MessageId::Str(format!("{p}{n}")),
                MessageId::Str(s) => MessageId::Str(format!("{p}{s}")),
            },
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Int(n) => write!(f, "{n}"),
            MessageId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        MessageId::Int(n)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId::Str(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::Str(s.to_string())
    }
}

/// The wire-level record wrapping every payload a pool exchanges.
///
/// Serialized as a whole by [`crate::codec::pack`] / [`crate::codec::unpack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The (possibly recursively tagged) payload.
    pub object: crate::value::Value,
    /// The id this payload is addressed under.
    pub id: MessageId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_of_int_renders_decimal() {
        let id = MessageId::Int(42);
        assert_eq!(id.apply_prefix(Some("round-")), MessageId::Str("round-42".into()));
    }

    #[test]
    fn prefix_of_str_joins_as_is() {
        let id = MessageId::Str("result".into());
        assert_eq!(id.apply_prefix(Some("round-")), MessageId::Str("round-result".into()));
    }

    #[test]
    fn no_prefix_is_identity() {
        let id = MessageId::Int(7);
        assert_eq!(id.apply_prefix(None), id);
    }

    #[test]
    fn display_renders_int_in_decimal() {
        assert_eq!(MessageId::Int(9).to_string(), "9");
        assert_eq!(MessageId::Str("x".into()).to_string(), "x");
    }
}
