//! Decoded value model: what result buffers expand into.

use serde_json::json;

use crate::types::NodeId;

/// One decoded value.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedValue {
    /// Absent / cleared.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer (int8/16/32, timestamps).
    Int(i64),
    /// Unsigned integer (uint8/16/32).
    Uint(u64),
    /// Float.
    Number(f64),
    /// String, text, alias, or enum variant name.
    String(String),
    /// Binary payload.
    Bytes(Vec<u8>),
    /// Single reference id.
    Ref(NodeId),
    /// Reference id run.
    Refs(Vec<NodeId>),
    /// Nested reference items from an include descend.
    Items(Vec<Item>),
    /// Vector elements widened to f64.
    Vector(Vec<f64>),
    /// Parsed json payload.
    Json(serde_json::Value),
    /// Approximate distinct count from a cardinality sketch.
    Count(u64),
}

impl DecodedValue {
    /// Json view of one value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DecodedValue::Null => serde_json::Value::Null,
            DecodedValue::Bool(v) => json!(v),
            DecodedValue::Int(v) => json!(v),
            DecodedValue::Uint(v) => json!(v),
            DecodedValue::Number(v) => json!(v),
            DecodedValue::String(v) => json!(v),
            DecodedValue::Bytes(v) => json!(v),
            DecodedValue::Ref(id) => json!(id.0),
            DecodedValue::Refs(ids) => json!(ids.iter().map(|i| i.0).collect::<Vec<_>>()),
            DecodedValue::Items(items) => {
                serde_json::Value::Array(items.iter().map(Item::to_json).collect())
            }
            DecodedValue::Vector(v) => json!(v),
            DecodedValue::Json(v) => v.clone(),
            DecodedValue::Count(v) => json!(v),
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DecodedValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer accessor, widening unsigned values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DecodedValue::Int(v) => Some(*v),
            DecodedValue::Uint(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded result item.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    /// Node id.
    pub id: NodeId,
    /// Decoded fields in buffer order, keyed by dotted path.
    pub fields: Vec<(String, DecodedValue)>,
}

impl Item {
    /// Field lookup by dotted path.
    pub fn get(&self, path: &str) -> Option<&DecodedValue> {
        self.fields
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }

    /// Json view: `{"id": .., fields nested on dots}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        root.insert("id".to_owned(), json!(self.id.0));
        for (path, value) in &self.fields {
            let mut node = &mut root;
            let mut parts = path.split('.').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    node.insert(part.to_owned(), value.to_json());
                } else {
                    node = node
                        .entry(part.to_owned())
                        .or_insert_with(|| serde_json::Value::Object(Default::default()))
                        .as_object_mut()
                        .expect("intermediate include nodes are objects");
                }
            }
        }
        serde_json::Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_paths_nest_in_json() {
        let item = Item {
            id: NodeId(4),
            fields: vec![
                ("meta.views".into(), DecodedValue::Uint(10)),
                ("meta.pinned".into(), DecodedValue::Bool(true)),
                ("name".into(), DecodedValue::String("a".into())),
            ],
        };
        let json = item.to_json();
        assert_eq!(json["id"], 4);
        assert_eq!(json["meta"]["views"], 10);
        assert_eq!(json["meta"]["pinned"], true);
        assert_eq!(json["name"], "a");
    }
}
