//! Vector/colvec writer: fixed-size numeric arrays matching the declared
//! element type and count exactly.

use crate::error::{Result, UmbraError};
use crate::schema::{PropertyDef, TypeTag};
use crate::types::Value;

use super::SeparatePayload;

/// Rejects size or element-type mismatches before writing anything.
pub fn write(def: &PropertyDef, value: &Value) -> Result<SeparatePayload> {
    let items = match value {
        Value::Vector(items) => items,
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected vector, got {}", other.kind_name()),
            ))
        }
    };
    let (elem_tag, declared_len) = def
        .elem
        .ok_or_else(|| UmbraError::validation(&def.path, "vector has no element spec"))?;
    if items.len() != declared_len as usize {
        return Err(UmbraError::validation(
            &def.path,
            format!("expected {declared_len} elements, got {}", items.len()),
        ));
    }
    let width = elem_tag
        .fixed_width()
        .ok_or_else(|| UmbraError::validation(&def.path, "vector element tag is not fixed"))?;
    let mut body = Vec::with_capacity(items.len() * width);
    for (i, &v) in items.iter().enumerate() {
        encode_element(def, elem_tag, v, i, &mut body)?;
    }
    Ok(SeparatePayload { flags: 0, body })
}

fn encode_element(
    def: &PropertyDef,
    tag: TypeTag,
    v: f64,
    index: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let integral = |lo: f64, hi: f64| -> Result<i64> {
        if v.fract() != 0.0 || v < lo || v > hi {
            return Err(UmbraError::validation(
                &def.path,
                format!("element {index} ({v}) does not fit the declared element type"),
            ));
        }
        Ok(v as i64)
    };
    match tag {
        TypeTag::Number => {
            if v.is_nan() {
                return Err(UmbraError::validation(
                    &def.path,
                    format!("element {index} is NaN"),
                ));
            }
            out.extend_from_slice(&v.to_le_bytes());
        }
        TypeTag::Int8 => out.push((integral(i8::MIN as f64, i8::MAX as f64)? as i8) as u8),
        TypeTag::Uint8 => out.push(integral(0.0, u8::MAX as f64)? as u8),
        TypeTag::Int16 => {
            out.extend_from_slice(&(integral(i16::MIN as f64, i16::MAX as f64)? as i16).to_le_bytes())
        }
        TypeTag::Uint16 => {
            out.extend_from_slice(&(integral(0.0, u16::MAX as f64)? as u16).to_le_bytes())
        }
        TypeTag::Int32 => {
            out.extend_from_slice(&(integral(i32::MIN as f64, i32::MAX as f64)? as i32).to_le_bytes())
        }
        TypeTag::Uint32 => {
            out.extend_from_slice(&(integral(0.0, u32::MAX as f64)? as u32).to_le_bytes())
        }
        TypeTag::Timestamp => {
            out.extend_from_slice(&integral(i64::MIN as f64, i64::MAX as f64)?.to_le_bytes())
        }
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("unsupported vector element tag {other:?}"),
            ))
        }
    }
    Ok(())
}
