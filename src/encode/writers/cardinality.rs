//! Cardinality sketch writer: hashes inputs into a fixed-stride payload
//! for approximate distinct-count tracking on the engine side.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::error::{Result, UmbraError};
use crate::schema::PropertyDef;
use crate::types::Value;

use super::SeparatePayload;

/// Deterministic 8-byte hash of one raw input value.
pub fn value_hash64(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(bytes);
    hasher.finish()
}

/// Accepts one string, a batch of strings, or pre-hashed 8-byte values;
/// appends each as one 8-byte stride.
pub fn write(def: &PropertyDef, value: &Value) -> Result<SeparatePayload> {
    let mut body = Vec::new();
    match value {
        Value::String(s) => body.extend_from_slice(&value_hash64(s.as_bytes()).to_le_bytes()),
        Value::Strings(items) => {
            body.reserve(items.len() * 8);
            for item in items {
                body.extend_from_slice(&value_hash64(item.as_bytes()).to_le_bytes());
            }
        }
        Value::Hashes(items) => {
            body.reserve(items.len() * 8);
            for item in items {
                body.extend_from_slice(&item.to_le_bytes());
            }
        }
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected string, strings, or hashes, got {}", other.kind_name()),
            ))
        }
    }
    Ok(SeparatePayload { flags: 0, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};

    fn def() -> (Schema, &'static str) {
        let schema = Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("t")
            .prop(PropDecl::new("visitors", PropKind::Cardinality))))
        .unwrap();
        (schema, "visitors")
    }

    #[test]
    fn payload_stride_is_eight_bytes() {
        let (schema, path) = def();
        let layout = schema.layout("t").unwrap();
        let d = layout.prop_by_path(path).unwrap();
        let payload = write(
            d,
            &Value::Strings(vec!["a".into(), "b".into(), "c".into()]),
        )
        .unwrap();
        assert_eq!(payload.body.len(), 24);
    }

    #[test]
    fn prehashed_values_pass_through_verbatim() {
        let (schema, path) = def();
        let layout = schema.layout("t").unwrap();
        let d = layout.prop_by_path(path).unwrap();
        let payload = write(d, &Value::Hashes(vec![0xDEAD_BEEF])).unwrap();
        assert_eq!(payload.body, 0xDEAD_BEEFu64.to_le_bytes());
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(value_hash64(b"x"), value_hash64(b"x"));
        assert_ne!(value_hash64(b"x"), value_hash64(b"y"));
    }
}
