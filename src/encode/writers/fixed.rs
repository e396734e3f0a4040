//! Fixed-width helpers: increment deltas and standalone fixed payloads.
//!
//! Main-region patching itself lives on [`TypeLayout::write_fixed`]; this
//! module covers the delta encoding used by increment/decrement opcodes,
//! which lets the engine apply the change without a prior read.

use crate::error::{Result, UmbraError};
use crate::schema::{PropertyDef, TypeTag};
use crate::types::Value;

/// Magnitude of a signed delta, split into (is_negative, bytes). The
/// opcode (increment vs decrement) carries the sign; the operand is the
/// magnitude in the property's own width.
pub fn encode_delta(def: &PropertyDef, delta: &Value) -> Result<(bool, Vec<u8>)> {
    match def.tag {
        TypeTag::Int8
        | TypeTag::Uint8
        | TypeTag::Int16
        | TypeTag::Uint16
        | TypeTag::Int32
        | TypeTag::Uint32
        | TypeTag::Timestamp => {
            let raw = match delta {
                Value::Int(v) => *v,
                Value::Uint(v) if *v <= i64::MAX as u64 => *v as i64,
                other => {
                    return Err(UmbraError::validation(
                        &def.path,
                        format!("expected integer delta, got {}", other.kind_name()),
                    ))
                }
            };
            if raw == 0 {
                return Err(UmbraError::validation(&def.path, "zero delta"));
            }
            let magnitude = raw.unsigned_abs();
            let width = def.len as usize;
            let max = if width >= 8 { u64::MAX } else { (1u64 << (width * 8)) - 1 };
            if magnitude > max {
                return Err(UmbraError::validation(
                    &def.path,
                    format!("delta magnitude {magnitude} exceeds field width"),
                ));
            }
            Ok((raw < 0, magnitude.to_le_bytes()[..width].to_vec()))
        }
        TypeTag::Number => {
            let raw = match delta {
                Value::Number(v) => *v,
                Value::Int(v) => *v as f64,
                other => {
                    return Err(UmbraError::validation(
                        &def.path,
                        format!("expected numeric delta, got {}", other.kind_name()),
                    ))
                }
            };
            if raw == 0.0 || raw.is_nan() {
                return Err(UmbraError::validation(&def.path, "zero or NaN delta"));
            }
            Ok((raw < 0.0, raw.abs().to_le_bytes().to_vec()))
        }
        other => Err(UmbraError::validation(
            &def.path,
            format!("{other:?} properties cannot be incremented"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};

    fn layout_with(kind: PropKind) -> Schema {
        Schema::compile(&SchemaDecl::new().ty(TypeDecl::new("t")
            .prop(PropDecl::new("n", kind))))
        .unwrap()
    }

    #[test]
    fn integer_delta_uses_field_width() {
        let schema = layout_with(PropKind::Uint16);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path("n").unwrap();
        let (neg, bytes) = encode_delta(def, &Value::Int(-300)).unwrap();
        assert!(neg);
        assert_eq!(bytes, 300u16.to_le_bytes());
        assert!(encode_delta(def, &Value::Int(70_000)).is_err());
    }

    #[test]
    fn number_delta_is_f64() {
        let schema = layout_with(PropKind::Number);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path("n").unwrap();
        let (neg, bytes) = encode_delta(def, &Value::Number(2.5)).unwrap();
        assert!(!neg);
        assert_eq!(bytes, 2.5f64.to_le_bytes());
    }

    #[test]
    fn non_numeric_targets_are_rejected() {
        let schema = layout_with(PropKind::String);
        let layout = schema.layout("t").unwrap();
        let def = layout.prop_by_path("n").unwrap();
        assert!(encode_delta(def, &Value::Int(1)).is_err());
    }
}
