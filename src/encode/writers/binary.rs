//! Binary property writer: raw bytes plus a CRC32 trailer.

use crate::error::{Result, UmbraError};
use crate::schema::PropertyDef;
use crate::types::checksum::payload_crc32;
use crate::types::Value;

use super::SeparatePayload;

/// Accepts byte-array-like input only; enforces `max_bytes` when declared.
pub fn write(def: &PropertyDef, value: &Value) -> Result<SeparatePayload> {
    let raw = match value {
        Value::Bytes(b) => b.as_slice(),
        other => {
            return Err(UmbraError::validation(
                &def.path,
                format!("expected bytes, got {}", other.kind_name()),
            ))
        }
    };
    if let Some(max) = def.max_bytes {
        if raw.len() > max as usize {
            return Err(UmbraError::validation(
                &def.path,
                format!("{} bytes exceeds max_bytes {max}", raw.len()),
            ));
        }
    }
    let crc = payload_crc32(def.tag as u8, def.id.0, raw);
    let mut body = Vec::with_capacity(raw.len() + 4);
    body.extend_from_slice(raw);
    body.extend_from_slice(&crc.to_le_bytes());
    Ok(SeparatePayload { flags: 0, body })
}
