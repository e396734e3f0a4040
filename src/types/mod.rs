//! Identifier newtypes and the input value model shared by the encoder,
//! query compiler, and decoder.

pub mod checksum;

use std::fmt;

/// Wire-level type discriminator for a schema type (2 bytes on the wire).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u16);

/// Property slot id within one type. `0` is reserved for the main region.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u8);

/// Node identifier (4 bytes little-endian on the wire). Provisional until
/// the owning batch settles.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u32);

/// Index into a schema's locale table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LocaleId(pub u8);

/// xxh64 checksum of a compiled schema; trails every query byte-code buffer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SchemaHash(pub u64);

/// The main region addressed as a pseudo-property.
pub const MAIN_PROP: PropId = PropId(0);

/// Terminator byte ending an item's segment stream in a result buffer.
pub const ITEM_TERMINATOR: u8 = 254;

/// Segment tag introducing a nested reference block in a result buffer.
pub const REF_SEGMENT: u8 = 255;

/// Upper bound on declared properties per type; leaves room for the
/// reserved ids above.
pub const MAX_PROPS: usize = 250;

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// One reference inside a `references` list, optionally carrying edge
/// properties scoped to that reference.
#[derive(Clone, Debug, PartialEq)]
pub struct RefEntry {
    /// Target node (provisional ids are accepted).
    pub id: NodeId,
    /// Edge properties keyed by path within the edge layout.
    pub edges: Vec<(String, Value)>,
}

impl RefEntry {
    /// A bare reference with no edge payload.
    pub fn plain(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            edges: Vec::new(),
        }
    }

    /// A reference carrying edge properties.
    pub fn with_edges(id: impl Into<NodeId>, edges: Vec<(String, Value)>) -> Self {
        Self {
            id: id.into(),
            edges,
        }
    }
}

/// Input value accepted by the mutation encoder and the filter compiler.
///
/// The encoder validates and coerces against the property definition before
/// any bytes are written; a mismatching variant is a validation error, not a
/// panic.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Clears a separate property, or is rejected for main properties.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer (int8/16/32, timestamp, enum ordinal, increment delta).
    Int(i64),
    /// Unsigned integer (uint8/16/32).
    Uint(u64),
    /// 64-bit float (`number` properties, number deltas).
    Number(f64),
    /// UTF-8 string (string/text/alias/enum-by-name).
    String(String),
    /// Raw bytes for `binary` properties.
    Bytes(Vec<u8>),
    /// Single reference target.
    Ref(NodeId),
    /// A `references` list, each entry optionally carrying edge properties.
    Refs(Vec<RefEntry>),
    /// Batch of raw string inputs for a cardinality sketch.
    Strings(Vec<String>),
    /// Pre-hashed 8-byte cardinality inputs, accepted verbatim.
    Hashes(Vec<u64>),
    /// Fixed-size numeric array for vector/colvec properties.
    Vector(Vec<f64>),
    /// Arbitrary json, stringified on encode.
    Json(serde_json::Value),
}

impl Value {
    /// Short variant name used in validation messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Ref(_) => "ref",
            Value::Refs(_) => "refs",
            Value::Strings(_) => "strings",
            Value::Hashes(_) => "hashes",
            Value::Vector(_) => "vector",
            Value::Json(_) => "json",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Uint(value as u64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Uint(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<NodeId> for Value {
    fn from(value: NodeId) -> Self {
        Value::Ref(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

/// Payload for one mutation call: dotted path to value, in call order.
pub type Payload = Vec<(String, Value)>;

/// Convenience for building payloads from literal pairs.
pub fn payload<const N: usize>(entries: [(&str, Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(path, value)| (path.to_owned(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i64), Value::Int(7));
        assert_eq!(Value::from(7u32), Value::Uint(7));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(NodeId(3)), Value::Ref(NodeId(3)));
    }

    #[test]
    fn reserved_ids_do_not_collide_with_props() {
        assert!(MAX_PROPS < ITEM_TERMINATOR as usize);
        assert!((ITEM_TERMINATOR as usize) < (REF_SEGMENT as usize));
    }
}
