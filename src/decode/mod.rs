//! Result decoder: expands an engine result buffer into structured items.
//!
//! Decoding never mutates the buffer and may be repeated; the same bytes
//! always decode to the same items. Main-region decoding walks only the
//! fields the include tree names, at their precomputed offsets.

pub mod value;

use bytes::Bytes;

use crate::error::{Result, UmbraError};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::le;
use crate::query::IncludeTree;
use crate::schema::{PropertyDef, TypeLayout, TypeTag};
use crate::types::checksum::payload_crc32;
use crate::types::{NodeId, PropId, ITEM_TERMINATOR, REF_SEGMENT};

pub use value::{DecodedValue, Item};

use crate::encode::writers::FLAG_COMPRESSED;

/// Decodes a framed result buffer: `[u32 count]{[u32 id][segments][254]}`.
pub fn decode_items(
    layout: &TypeLayout,
    include: &IncludeTree,
    buffer: &Bytes,
) -> Result<Vec<Item>> {
    let mut cur = Cursor::new(buffer);
    let items = decode_stream(layout, include, &mut cur)?;
    cur.ensure_consumed()?;
    Ok(items)
}

fn decode_stream(
    layout: &TypeLayout,
    include: &IncludeTree,
    cur: &mut Cursor<'_>,
) -> Result<Vec<Item>> {
    let count = cur.u32()? as usize;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(decode_item(layout, include, cur)?);
    }
    Ok(items)
}

fn decode_item(
    layout: &TypeLayout,
    include: &IncludeTree,
    cur: &mut Cursor<'_>,
) -> Result<Item> {
    let id = NodeId(cur.u32()?);
    let mut fields = Vec::new();
    loop {
        let tag = cur.u8()?;
        match tag {
            0 => {
                let main = cur.take(layout.main_len as usize)?;
                for prop in &include.fields {
                    let def = layout.prop(*prop)?;
                    if !def.is_main() {
                        continue;
                    }
                    let value = match TypeLayout::read_fixed(def, main)? {
                        crate::types::Value::Null => DecodedValue::Null,
                        other => fixed_to_decoded(other),
                    };
                    fields.push((def.path.clone(), value));
                }
            }
            ITEM_TERMINATOR => break,
            REF_SEGMENT => {
                let prop = PropId(cur.u8()?);
                let sub_tag = cur.u16()?;
                let len = cur.u32()? as usize;
                let sub_bytes = cur.take(len)?;
                let descend = include
                    .ref_for(prop)
                    .ok_or(UmbraError::Corruption("unrequested reference segment"))?;
                if descend.target.tag.0 != sub_tag {
                    return Err(UmbraError::Corruption("reference segment type mismatch"));
                }
                let def = layout.prop(prop)?;
                let mut sub_cur = Cursor::new(sub_bytes);
                let nested = decode_stream(&descend.target, &descend.tree, &mut sub_cur)?;
                sub_cur.ensure_consumed()?;
                fields.push((def.path.clone(), DecodedValue::Items(nested)));
            }
            prop_byte => {
                let def = layout.prop(PropId(prop_byte))?;
                let len = cur.u16()? as usize;
                let payload = cur.take(len)?;
                if payload.is_empty() {
                    fields.push((def.path.clone(), DecodedValue::Null));
                    continue;
                }
                let flags = payload[0];
                let value = decode_separate(def, flags, &payload[1..])?;
                fields.push((def.path.clone(), value));
            }
        }
    }
    Ok(Item { id, fields })
}

fn fixed_to_decoded(value: crate::types::Value) -> DecodedValue {
    use crate::types::Value;
    match value {
        Value::Null => DecodedValue::Null,
        Value::Bool(v) => DecodedValue::Bool(v),
        Value::Int(v) => DecodedValue::Int(v),
        Value::Uint(v) => DecodedValue::Uint(v),
        Value::Number(v) => DecodedValue::Number(v),
        Value::String(v) => DecodedValue::String(v),
        _ => DecodedValue::Null,
    }
}

/// Decodes one stored separate payload (flags byte already split off).
pub fn decode_separate(def: &PropertyDef, flags: u8, body: &[u8]) -> Result<DecodedValue> {
    match def.tag {
        TypeTag::String | TypeTag::Alias => {
            let raw = verified_text(def, flags, body)?;
            Ok(DecodedValue::String(raw))
        }
        TypeTag::Text => {
            if body.is_empty() {
                return Err(UmbraError::Corruption("text payload missing locale"));
            }
            let raw = verified_text(def, flags, &body[1..])?;
            Ok(DecodedValue::String(raw))
        }
        TypeTag::Json => {
            let raw = verified_text(def, flags, body)?;
            let parsed = serde_json::from_str(&raw)
                .map_err(|_| UmbraError::Corruption("stored json does not parse"))?;
            Ok(DecodedValue::Json(parsed))
        }
        TypeTag::Binary => {
            if body.len() < 4 {
                return Err(UmbraError::Corruption("binary payload truncated"));
            }
            let (raw, crc) = body.split_at(body.len() - 4);
            if le::get_u32(crc) != payload_crc32(def.tag as u8, def.id.0, raw) {
                return Err(UmbraError::Integrity("binary checksum mismatch"));
            }
            Ok(DecodedValue::Bytes(raw.to_vec()))
        }
        TypeTag::Reference => {
            if body.len() != 4 {
                return Err(UmbraError::Corruption("reference payload is not 4 bytes"));
            }
            Ok(DecodedValue::Ref(NodeId(le::get_u32(body))))
        }
        TypeTag::References => {
            if body.len() % 4 != 0 {
                return Err(UmbraError::Corruption("reference run length not 4-aligned"));
            }
            let ids = body
                .chunks_exact(4)
                .map(|c| NodeId(le::get_u32(c)))
                .collect();
            Ok(DecodedValue::Refs(ids))
        }
        TypeTag::Cardinality => {
            if body.len() != 8 {
                return Err(UmbraError::Corruption("cardinality count is not 8 bytes"));
            }
            Ok(DecodedValue::Count(le::get_u64(body)))
        }
        TypeTag::Vector | TypeTag::ColVec => decode_vector(def, body),
        TypeTag::Boolean
        | TypeTag::Int8
        | TypeTag::Uint8
        | TypeTag::Int16
        | TypeTag::Uint16
        | TypeTag::Int32
        | TypeTag::Uint32
        | TypeTag::Number
        | TypeTag::Enum
        | TypeTag::Timestamp
        | TypeTag::Created
        | TypeTag::Updated => Err(UmbraError::Corruption("fixed property in separate segment")),
    }
}

/// Splits the CRC trailer, decompresses when flagged, verifies, returns
/// the UTF-8 text. A checksum mismatch is corruption of the stored value,
/// not schema skew, so it surfaces as `Integrity`.
fn verified_text(def: &PropertyDef, flags: u8, body: &[u8]) -> Result<String> {
    if body.len() < 4 {
        return Err(UmbraError::Corruption("string payload truncated"));
    }
    let (stored, crc) = body.split_at(body.len() - 4);
    let raw = if flags & FLAG_COMPRESSED != 0 {
        snap::raw::Decoder::new()
            .decompress_vec(stored)
            .map_err(|_| UmbraError::Integrity("string payload does not decompress"))?
    } else {
        stored.to_vec()
    };
    if le::get_u32(crc) != payload_crc32(def.tag as u8, def.id.0, &raw) {
        tracing::warn!(path = %def.path, "separate payload checksum mismatch");
        return Err(UmbraError::Integrity("string checksum mismatch"));
    }
    String::from_utf8(raw).map_err(|_| UmbraError::Corruption("stored string not utf8"))
}

fn decode_vector(def: &PropertyDef, body: &[u8]) -> Result<DecodedValue> {
    let (elem_tag, declared_len) = def
        .elem
        .ok_or(UmbraError::Corruption("vector payload without element spec"))?;
    let width = elem_tag
        .fixed_width()
        .ok_or(UmbraError::Corruption("vector element tag not fixed"))?;
    if body.len() != width * declared_len as usize {
        return Err(UmbraError::Corruption("vector payload size mismatch"));
    }
    let mut out = Vec::with_capacity(declared_len as usize);
    for chunk in body.chunks_exact(width) {
        let v = match elem_tag {
            TypeTag::Number => le::get_f64(chunk),
            TypeTag::Int8 => (chunk[0] as i8) as f64,
            TypeTag::Uint8 => chunk[0] as f64,
            TypeTag::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            TypeTag::Uint16 => le::get_u16(chunk) as f64,
            TypeTag::Int32 => {
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
            TypeTag::Uint32 => le::get_u32(chunk) as f64,
            TypeTag::Timestamp => le::get_i64(chunk) as f64,
            _ => return Err(UmbraError::Corruption("vector element tag not numeric")),
        };
        out.push(v);
    }
    Ok(DecodedValue::Vector(out))
}
